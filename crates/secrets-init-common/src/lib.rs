//! Common types for kube-secrets-init: errors, constants and telemetry

#![deny(missing_docs)]

pub mod error;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default image carrying the secrets-init helper binary
pub const DEFAULT_HELPER_IMAGE: &str = "doitintl/secrets-init:latest";

/// Default name of the shared volume holding the helper binary
pub const DEFAULT_VOLUME_NAME: &str = "secrets-init-bin";

/// Default mount path of the shared volume inside every mutated container
pub const DEFAULT_VOLUME_PATH: &str = "/secrets-init/bin";

/// File name of the helper binary inside the shared volume
pub const HELPER_BINARY_NAME: &str = "secrets-init";

/// Location of the helper binary inside the helper image
pub const HELPER_BINARY_SOURCE_PATH: &str = "/usr/local/bin/secrets-init";

/// Name of the bootstrap init container that copies the helper binary
pub const BOOTSTRAP_CONTAINER_NAME: &str = "copy-secrets-init";

/// Default listen address of the admission webhook
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8443";

/// Default data key of `kubernetes.io/dockerconfigjson` secrets
pub const DEFAULT_DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Service name reported in traces and metrics
pub const SERVICE_NAME: &str = "kube-secrets-init";
