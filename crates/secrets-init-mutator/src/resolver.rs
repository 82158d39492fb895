//! Resolution of `envFrom` and `valueFrom` indirections
//!
//! Follows ConfigMap and Secret references of a container and keeps only the
//! values that name a secret-manager entry. Everything else is dropped here,
//! since only secret references influence the mutation decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar};
use tracing::debug;

use secrets_init_common::Result;

use crate::detector::is_secret_reference;
use crate::lookup::ObjectLookup;
use crate::types::{EnvFromRef, EnvironmentBinding, ValueFromRef};

/// Resolves container environment references into secret-tagged bindings
#[derive(Clone)]
pub struct PodSpecResolver {
    lookup: Arc<dyn ObjectLookup>,
}

impl PodSpecResolver {
    /// Create a resolver reading objects through `lookup`
    pub fn new(lookup: Arc<dyn ObjectLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve bulk `envFrom` imports.
    ///
    /// Sources are processed in declared order. A missing object is skipped
    /// only when its reference is optional; any other failure aborts the
    /// whole resolution and no partial list is returned.
    pub async fn resolve_env_from(
        &self,
        sources: &[EnvFromSource],
        namespace: &str,
    ) -> Result<Vec<EnvironmentBinding>> {
        let mut bindings = Vec::new();

        for source in sources {
            let prefix = source.prefix.as_deref().unwrap_or_default();
            for reference in EnvFromRef::from_source(source) {
                let data = match self.fetch_all(&reference, namespace).await {
                    Ok(data) => data,
                    Err(e) if e.is_not_found() && reference.optional() => {
                        debug!(
                            namespace = %namespace,
                            reference = %reference.name(),
                            "optional envFrom source not found, skipping"
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                bindings.extend(
                    data.into_iter()
                        .filter(|(_, value)| is_secret_reference(value))
                        .map(|(key, value)| EnvironmentBinding::new(format!("{prefix}{key}"), value)),
                );
            }
        }

        Ok(bindings)
    }

    /// Resolve a single `valueFrom` reference.
    ///
    /// Returns `None` when the variable has no ConfigMap/Secret key reference
    /// or when the referenced value is not a secret reference. Lookup errors,
    /// including absence, always propagate.
    pub async fn resolve_value_from(
        &self,
        env: &EnvVar,
        namespace: &str,
    ) -> Result<Option<EnvironmentBinding>> {
        let Some(reference) = env.value_from.as_ref().and_then(ValueFromRef::from_source) else {
            return Ok(None);
        };

        let value = match &reference {
            ValueFromRef::ConfigMapKey { name, key } => self
                .lookup
                .config_map_data(namespace, name)
                .await?
                .remove(key),
            ValueFromRef::SecretKey { name, key } => self
                .lookup
                .secret_data(namespace, name)
                .await?
                .remove(key)
                .and_then(|bytes| String::from_utf8(bytes).ok()),
        };

        Ok(value
            .filter(|v| is_secret_reference(v))
            .map(|v| EnvironmentBinding::new(env.name.clone(), v)))
    }

    async fn fetch_all(
        &self,
        reference: &EnvFromRef,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>> {
        match reference {
            EnvFromRef::ConfigMap { name, .. } => self.lookup.config_map_data(namespace, name).await,
            EnvFromRef::Secret { name, .. } => {
                let data = self.lookup.secret_data(namespace, name).await?;
                // Non UTF-8 values cannot be secret references
                Ok(data
                    .into_iter()
                    .filter_map(|(k, v)| String::from_utf8(v).ok().map(|v| (k, v)))
                    .collect())
            }
        }
    }
}
