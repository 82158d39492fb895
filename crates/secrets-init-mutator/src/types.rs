//! Domain types for environment reference resolution

use k8s_openapi::api::core::v1::{EnvFromSource, EnvVarSource};

/// A resolved environment variable whose value names a secret-manager entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBinding {
    /// Variable name as the container will see it
    pub name: String,
    /// Secret-manager reference the helper will resolve at start time
    pub value: String,
}

impl EnvironmentBinding {
    /// Create a binding
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One bulk `envFrom` import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvFromRef {
    /// Import every key of a ConfigMap
    ConfigMap {
        /// ConfigMap name
        name: String,
        /// Skip silently when the ConfigMap does not exist
        optional: bool,
    },
    /// Import every key of a Secret
    Secret {
        /// Secret name
        name: String,
        /// Skip silently when the Secret does not exist
        optional: bool,
    },
}

impl EnvFromRef {
    /// Split a Kubernetes `EnvFromSource` into its references.
    ///
    /// The API server only admits one of the two refs, but both are honored
    /// (ConfigMap first) if a client ever sends both.
    pub fn from_source(source: &EnvFromSource) -> Vec<EnvFromRef> {
        let mut refs = Vec::with_capacity(1);
        if let Some(cm) = &source.config_map_ref {
            refs.push(EnvFromRef::ConfigMap {
                name: cm.name.clone(),
                optional: cm.optional.unwrap_or(false),
            });
        }
        if let Some(secret) = &source.secret_ref {
            refs.push(EnvFromRef::Secret {
                name: secret.name.clone(),
                optional: secret.optional.unwrap_or(false),
            });
        }
        refs
    }

    /// Referenced object name
    pub fn name(&self) -> &str {
        match self {
            EnvFromRef::ConfigMap { name, .. } | EnvFromRef::Secret { name, .. } => name,
        }
    }

    /// Whether a missing object is tolerated
    pub fn optional(&self) -> bool {
        match self {
            EnvFromRef::ConfigMap { optional, .. } | EnvFromRef::Secret { optional, .. } => {
                *optional
            }
        }
    }
}

/// A single-key `valueFrom` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueFromRef {
    /// One key of a ConfigMap
    ConfigMapKey {
        /// ConfigMap name
        name: String,
        /// Data key
        key: String,
    },
    /// One key of a Secret
    SecretKey {
        /// Secret name
        name: String,
        /// Data key
        key: String,
    },
}

impl ValueFromRef {
    /// Extract the ConfigMap/Secret key reference of a `valueFrom` source.
    ///
    /// Field and resource refs never carry secret references and yield `None`.
    pub fn from_source(source: &EnvVarSource) -> Option<ValueFromRef> {
        if let Some(cm) = &source.config_map_key_ref {
            return Some(ValueFromRef::ConfigMapKey {
                name: cm.name.clone(),
                key: cm.key.clone(),
            });
        }
        source
            .secret_key_ref
            .as_ref()
            .map(|secret| ValueFromRef::SecretKey {
                name: secret.name.clone(),
                key: secret.key.clone(),
            })
    }
}
