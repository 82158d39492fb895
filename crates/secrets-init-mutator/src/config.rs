//! Mutation settings shared by every admitted pod

use std::fmt;

use k8s_openapi::api::core::v1::VolumeMount;

use secrets_init_common::{
    DEFAULT_HELPER_IMAGE, DEFAULT_VOLUME_NAME, DEFAULT_VOLUME_PATH, HELPER_BINARY_NAME,
};

/// Secret manager the helper binary talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SecretProvider {
    /// AWS Secrets Manager and SSM Parameter Store
    #[default]
    Aws,
    /// GCP Secret Manager
    Google,
}

impl SecretProvider {
    /// Value passed to the helper's `--provider` flag
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretProvider::Aws => "aws",
            SecretProvider::Google => "google",
        }
    }
}

impl fmt::Display for SecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image pull policy of the bootstrap container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PullPolicy {
    /// Always pull
    Always,
    /// Pull only when the node lacks the image
    #[default]
    IfNotPresent,
    /// Never pull
    Never,
}

impl PullPolicy {
    /// Kubernetes spelling of the policy
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How pods are rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationConfig {
    /// Provider selected for the helper binary
    pub provider: SecretProvider,
    /// Image carrying the helper binary
    pub helper_image: String,
    /// Pull policy of the bootstrap container
    pub pull_policy: PullPolicy,
    /// Name of the shared volume
    pub volume_name: String,
    /// Mount path of the shared volume in every mutated container
    pub volume_path: String,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            provider: SecretProvider::default(),
            helper_image: DEFAULT_HELPER_IMAGE.to_string(),
            pull_policy: PullPolicy::default(),
            volume_name: DEFAULT_VOLUME_NAME.to_string(),
            volume_path: DEFAULT_VOLUME_PATH.to_string(),
        }
    }
}

impl MutationConfig {
    /// Path the helper binary is executed from inside mutated containers
    pub fn helper_binary_path(&self) -> String {
        format!(
            "{}/{}",
            self.volume_path.trim_end_matches('/'),
            HELPER_BINARY_NAME
        )
    }

    /// `--provider=<name>` flag prepended to rewritten args
    pub fn provider_flag(&self) -> String {
        format!("--provider={}", self.provider)
    }

    /// Mount of the shared volume added to mutated containers
    pub fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: self.volume_name.clone(),
            mount_path: self.volume_path.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_flags() {
        let config = MutationConfig::default();
        assert_eq!(config.provider, SecretProvider::Aws);
        assert_eq!(config.helper_image, "doitintl/secrets-init:latest");
        assert_eq!(config.pull_policy, PullPolicy::IfNotPresent);
        assert_eq!(config.volume_name, "secrets-init-bin");
        assert_eq!(config.volume_path, "/secrets-init/bin");
    }

    #[test]
    fn helper_path_does_not_double_slashes() {
        let mut config = MutationConfig::default();
        assert_eq!(config.helper_binary_path(), "/secrets-init/bin/secrets-init");

        config.volume_path = "/opt/helper/".to_string();
        assert_eq!(config.helper_binary_path(), "/opt/helper/secrets-init");
    }

    #[test]
    fn provider_flag_uses_lowercase_name() {
        let config = MutationConfig {
            provider: SecretProvider::Google,
            ..Default::default()
        };
        assert_eq!(config.provider_flag(), "--provider=google");
    }

    #[test]
    fn volume_mount_uses_configured_name_and_path() {
        let mount = MutationConfig::default().volume_mount();
        assert_eq!(mount.name, "secrets-init-bin");
        assert_eq!(mount.mount_path, "/secrets-init/bin");
        assert_eq!(mount.read_only, None);
    }
}
