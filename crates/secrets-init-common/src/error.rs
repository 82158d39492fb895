//! Error types for the secrets-init webhook
//!
//! Errors carry the object kind, name and namespace they were raised for so
//! a denied admission explains which reference broke the mutation.

use thiserror::Error;

/// Main error type for secrets-init operations
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced ConfigMap or Secret does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Object kind (ConfigMap, Secret, ServiceAccount)
        kind: String,
        /// Object name
        name: String,
        /// Namespace the lookup ran in
        namespace: String,
    },

    /// Kubernetes API lookup failed for a reason other than absence
    #[error("failed to get {kind} {namespace}/{name}: {source}")]
    Lookup {
        /// Object kind (ConfigMap, Secret, ServiceAccount)
        kind: String,
        /// Object name
        name: String,
        /// Namespace the lookup ran in
        namespace: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Image default entrypoint could not be resolved from the registry
    #[error("failed to resolve image {image}: {message}")]
    ImageResolution {
        /// Image reference as written in the container spec
        image: String,
        /// Description of what failed
        message: String,
    },

    /// Kubernetes client error outside of object lookups
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "server", "tls")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for a namespaced object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Classify a kube-rs error raised while getting a namespaced object.
    ///
    /// A 404 from the API server becomes [`Error::NotFound`], anything else
    /// becomes [`Error::Lookup`].
    pub fn from_lookup(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        match source {
            kube::Error::Api(ref ae) if ae.code == 404 => Self::not_found(kind, namespace, name),
            source => Self::Lookup {
                kind: kind.into(),
                name: name.into(),
                namespace: namespace.into(),
                source,
            },
        }
    }

    /// Create an image resolution error
    pub fn image_resolution(image: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ImageResolution {
            image: image.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the referenced object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error is retryable
    ///
    /// The webhook never retries on its own; this only feeds logs so an
    /// operator can tell a misconfigured reference from a flaky API server.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Lookup { source, .. } | Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::ImageResolution { .. } => true,
            Error::Internal { .. } => true,
            Error::NotFound { .. } => false,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
        }
    }
}
