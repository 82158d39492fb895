//! Per-container mutation decision
//!
//! A container is rewritten only when at least one of its variables resolves
//! to a secret-manager reference. The rewritten container starts the helper
//! binary, which receives the original effective command as its arguments.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Container;
use tracing::{debug, info};

use secrets_init_common::{Error, Result};

use crate::config::MutationConfig;
use crate::detector::{is_secret_reference, reference_backend};
use crate::registry::{ImageEntrypointResolver, PullContext};
use crate::resolver::PodSpecResolver;
use crate::types::EnvironmentBinding;

/// Rewrites containers to start through the helper binary
#[derive(Clone)]
pub struct ContainerMutator {
    resolver: PodSpecResolver,
    images: Arc<dyn ImageEntrypointResolver>,
    config: Arc<MutationConfig>,
}

impl ContainerMutator {
    /// Create a mutator
    pub fn new(
        resolver: PodSpecResolver,
        images: Arc<dyn ImageEntrypointResolver>,
        config: Arc<MutationConfig>,
    ) -> Self {
        Self {
            resolver,
            images,
            config,
        }
    }

    /// Settings this mutator rewrites with
    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    /// Collect the secret-referencing variables of a container.
    ///
    /// `envFrom` bindings come first in declared source order, followed by
    /// `env` entries in declared order.
    pub async fn collect_bindings(
        &self,
        container: &Container,
        namespace: &str,
    ) -> Result<Vec<EnvironmentBinding>> {
        let mut bindings = match &container.env_from {
            Some(sources) if !sources.is_empty() => {
                self.resolver.resolve_env_from(sources, namespace).await?
            }
            _ => Vec::new(),
        };

        for env in container.env.iter().flatten() {
            if let Some(value) = env.value.as_deref().filter(|v| is_secret_reference(v)) {
                bindings.push(EnvironmentBinding::new(env.name.clone(), value));
            } else if env.value_from.is_some() {
                if let Some(binding) = self.resolver.resolve_value_from(env, namespace).await? {
                    bindings.push(binding);
                }
            }
        }

        Ok(bindings)
    }

    /// Whether the container already starts through the helper binary
    pub fn is_wrapped(&self, container: &Container) -> bool {
        let helper = self.config.helper_binary_path();
        let runs_helper = matches!(container.command.as_deref(), Some([cmd]) if *cmd == helper);
        let has_mount = container
            .volume_mounts
            .iter()
            .flatten()
            .any(|m| m.name == self.config.volume_name);
        runs_helper && has_mount
    }

    /// Mutate one container in place, returning whether it was rewritten.
    ///
    /// On error the container is left untouched.
    pub async fn mutate(
        &self,
        container: &mut Container,
        context: &PullContext,
        namespace: &str,
    ) -> Result<bool> {
        if self.is_wrapped(container) {
            debug!(container = %container.name, "container already wrapped, skipping");
            return Ok(false);
        }

        let bindings = self.collect_bindings(container, namespace).await?;
        if bindings.is_empty() {
            debug!(container = %container.name, "no secret references");
            return Ok(false);
        }

        let command = self.effective_command(container, context).await?;

        let mut args = Vec::with_capacity(command.len() + 1);
        args.push(self.config.provider_flag());
        args.extend(command);

        container.command = Some(vec![self.config.helper_binary_path()]);
        container.args = Some(args);
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(self.config.volume_mount());

        info!(
            container = %container.name,
            variables = ?bindings.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
            backends = ?backends(&bindings),
            "wrapped container entrypoint"
        );
        Ok(true)
    }

    /// Command plus arguments the container would start with unmodified.
    ///
    /// A declared `command` wins. Otherwise the image entrypoint is used, and
    /// the image `Cmd` only when the container declares no `args` either.
    async fn effective_command(
        &self,
        container: &Container,
        context: &PullContext,
    ) -> Result<Vec<String>> {
        let declared_args = container.args.as_deref().unwrap_or_default();

        let mut command = match container.command.as_deref() {
            Some(cmd) if !cmd.is_empty() => cmd.to_vec(),
            _ => {
                let image = container
                    .image
                    .as_deref()
                    .filter(|i| !i.is_empty())
                    .ok_or_else(|| {
                        Error::image_resolution(
                            container.name.clone(),
                            "container declares no command and no image",
                        )
                    })?;
                let config = self.images.resolve_entrypoint(image, context).await?;
                let mut base = config.entrypoint;
                if declared_args.is_empty() {
                    base.extend(config.cmd);
                }
                base
            }
        };

        command.extend_from_slice(declared_args);
        Ok(command)
    }
}

/// Distinct secret backends referenced by `bindings`, in first-seen order
fn backends(bindings: &[EnvironmentBinding]) -> Vec<&'static str> {
    let mut seen = Vec::new();
    for backend in bindings.iter().filter_map(|b| reference_backend(&b.value)) {
        if !seen.contains(&backend) {
            seen.push(backend);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretProvider;
    use crate::lookup::MockObjectLookup;
    use crate::registry::{ImageEntrypointConfig, MockImageEntrypointResolver};
    use k8s_openapi::api::core::v1::{
        EnvFromSource, EnvVar, EnvVarSource, SecretEnvSource, SecretKeySelector, VolumeMount,
    };
    use std::collections::BTreeMap;

    const SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:test/secret";
    const GCP_SECRET: &str = "gcp:secretmanager:projects/p/secrets/db/versions/1";
    const HELPER: &str = "/secrets-init/bin/secrets-init";

    fn no_lookups() -> MockObjectLookup {
        let mut lookup = MockObjectLookup::new();
        lookup.expect_config_map_data().never();
        lookup.expect_secret_data().never();
        lookup.expect_service_account_pull_secrets().never();
        lookup
    }

    fn no_image_lookups() -> MockImageEntrypointResolver {
        let mut images = MockImageEntrypointResolver::new();
        images.expect_resolve_entrypoint().never();
        images
    }

    fn image_returning(config: ImageEntrypointConfig) -> MockImageEntrypointResolver {
        let mut images = MockImageEntrypointResolver::new();
        images
            .expect_resolve_entrypoint()
            .withf(|image, _| image == "test-image")
            .times(1)
            .returning(move |_, _| Ok(config.clone()));
        images
    }

    fn mutator_with(
        lookup: MockObjectLookup,
        images: MockImageEntrypointResolver,
        provider: SecretProvider,
    ) -> ContainerMutator {
        let config = MutationConfig {
            provider,
            ..Default::default()
        };
        ContainerMutator::new(
            PodSpecResolver::new(Arc::new(lookup)),
            Arc::new(images),
            Arc::new(config),
        )
    }

    fn mutator(lookup: MockObjectLookup, images: MockImageEntrypointResolver) -> ContainerMutator {
        mutator_with(lookup, images, SecretProvider::Aws)
    }

    fn literal(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn container(command: Option<&[&str]>, args: Option<&[&str]>, env: Vec<EnvVar>) -> Container {
        let to_vec = |s: &[&str]| s.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        Container {
            name: "app".to_string(),
            image: Some("test-image".to_string()),
            command: command.map(to_vec),
            args: args.map(to_vec),
            env: Some(env),
            ..Default::default()
        }
    }

    fn strings(values: &[&str]) -> Option<Vec<String>> {
        Some(values.iter().map(|s| s.to_string()).collect())
    }

    fn helper_mount() -> VolumeMount {
        VolumeMount {
            name: "secrets-init-bin".to_string(),
            mount_path: "/secrets-init/bin".to_string(),
            ..Default::default()
        }
    }

    // =========================================================================
    // Rewriting
    // =========================================================================

    #[tokio::test]
    async fn command_without_args_is_wrapped() {
        let m = mutator(no_lookups(), no_image_lookups());
        let mut c = container(Some(&["echo"]), None, vec![literal("SECRET", SECRET_ARN)]);

        let mutated = m.mutate(&mut c, &PullContext::default(), "default").await.unwrap();

        assert!(mutated);
        assert_eq!(c.command, strings(&[HELPER]));
        assert_eq!(c.args, strings(&["--provider=aws", "echo"]));
        assert_eq!(c.volume_mounts, Some(vec![helper_mount()]));
        assert_eq!(c.image.as_deref(), Some("test-image"));
    }

    #[tokio::test]
    async fn command_and_args_with_google_provider() {
        let m = mutator_with(no_lookups(), no_image_lookups(), SecretProvider::Google);
        let mut c = container(
            Some(&["echo"]),
            Some(&["test"]),
            vec![literal("DB", GCP_SECRET)],
        );

        assert!(m.mutate(&mut c, &PullContext::default(), "default").await.unwrap());
        assert_eq!(c.command, strings(&[HELPER]));
        assert_eq!(c.args, strings(&["--provider=google", "echo", "test"]));
    }

    #[tokio::test]
    async fn args_without_command_use_image_entrypoint_only() {
        let images = image_returning(ImageEntrypointConfig {
            entrypoint: vec!["/bin/zsh".to_string()],
            cmd: vec!["-l".to_string()],
        });
        let m = mutator(no_lookups(), images);
        let mut c = container(None, Some(&["-c", "echo test"]), vec![literal("S", SECRET_ARN)]);

        assert!(m.mutate(&mut c, &PullContext::default(), "default").await.unwrap());
        assert_eq!(c.command, strings(&[HELPER]));
        assert_eq!(c.args, strings(&["--provider=aws", "/bin/zsh", "-c", "echo test"]));
    }

    #[tokio::test]
    async fn no_command_no_args_uses_entrypoint_then_cmd() {
        let images = image_returning(ImageEntrypointConfig {
            entrypoint: vec!["/bin/zsh".to_string()],
            cmd: vec!["-c".to_string(), "serve".to_string()],
        });
        let m = mutator(no_lookups(), images);
        let mut c = container(None, None, vec![literal("S", SECRET_ARN)]);

        assert!(m.mutate(&mut c, &PullContext::default(), "default").await.unwrap());
        assert_eq!(c.args, strings(&["--provider=aws", "/bin/zsh", "-c", "serve"]));
    }

    #[tokio::test]
    async fn image_with_cmd_and_no_entrypoint() {
        let images = image_returning(ImageEntrypointConfig {
            entrypoint: vec![],
            cmd: vec!["test-cmd".to_string()],
        });
        let m = mutator(no_lookups(), images);
        let mut c = container(None, None, vec![literal("S", SECRET_ARN)]);

        assert!(m.mutate(&mut c, &PullContext::default(), "default").await.unwrap());
        assert_eq!(c.args, strings(&["--provider=aws", "test-cmd"]));
    }

    #[tokio::test]
    async fn existing_mounts_are_kept() {
        let m = mutator(no_lookups(), no_image_lookups());
        let mut c = container(Some(&["echo"]), None, vec![literal("S", SECRET_ARN)]);
        let data = VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        };
        c.volume_mounts = Some(vec![data.clone()]);

        m.mutate(&mut c, &PullContext::default(), "default").await.unwrap();
        assert_eq!(c.volume_mounts, Some(vec![data, helper_mount()]));
    }

    #[tokio::test]
    async fn custom_volume_path_controls_helper_path() {
        let config = MutationConfig {
            volume_path: "/opt/secrets/".to_string(),
            volume_name: "helper".to_string(),
            ..Default::default()
        };
        let m = ContainerMutator::new(
            PodSpecResolver::new(Arc::new(no_lookups())),
            Arc::new(no_image_lookups()),
            Arc::new(config),
        );
        let mut c = container(Some(&["run"]), None, vec![literal("S", SECRET_ARN)]);

        m.mutate(&mut c, &PullContext::default(), "default").await.unwrap();
        assert_eq!(c.command, strings(&["/opt/secrets/secrets-init"]));
        let mounts = c.volume_mounts.unwrap();
        assert_eq!(mounts[0].name, "helper");
        assert_eq!(mounts[0].mount_path, "/opt/secrets/");
    }

    // =========================================================================
    // Unchanged containers
    // =========================================================================

    #[tokio::test]
    async fn container_without_secret_references_is_unchanged() {
        let m = mutator(no_lookups(), no_image_lookups());
        let mut c = container(
            Some(&["/bin/bash"]),
            None,
            vec![literal("MODE", "production"), literal("ARN", "arn:aws:s3:::bucket")],
        );
        let before = c.clone();

        let mutated = m.mutate(&mut c, &PullContext::default(), "default").await.unwrap();
        assert!(!mutated);
        assert_eq!(c, before);
    }

    #[tokio::test]
    async fn already_wrapped_container_is_skipped() {
        let m = mutator(no_lookups(), no_image_lookups());
        let mut c = container(Some(&["echo"]), None, vec![literal("S", SECRET_ARN)]);
        assert!(m.mutate(&mut c, &PullContext::default(), "default").await.unwrap());
        let wrapped = c.clone();

        assert!(!m.mutate(&mut c, &PullContext::default(), "default").await.unwrap());
        assert_eq!(c, wrapped);
        assert_eq!(c.volume_mounts.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn helper_command_without_mount_is_not_considered_wrapped() {
        let m = mutator(no_lookups(), no_image_lookups());
        let c = container(Some(&[HELPER]), None, vec![]);
        assert!(!m.is_wrapped(&c));
    }

    // =========================================================================
    // Indirect references
    // =========================================================================

    #[tokio::test]
    async fn secret_key_reference_triggers_wrapping() {
        let mut lookup = MockObjectLookup::new();
        lookup
            .expect_secret_data()
            .withf(|ns, name| ns == "team-a" && name == "db")
            .times(1)
            .returning(|_, _| {
                Ok(BTreeMap::from([(
                    "password".to_string(),
                    SECRET_ARN.as_bytes().to_vec(),
                )]))
            });
        let m = mutator(lookup, no_image_lookups());
        let mut c = container(
            Some(&["echo"]),
            None,
            vec![EnvVar {
                name: "DB_PASSWORD".to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: "db".to_string(),
                        key: "password".to_string(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
            }],
        );

        assert!(m.mutate(&mut c, &PullContext::default(), "team-a").await.unwrap());
        assert_eq!(c.args, strings(&["--provider=aws", "echo"]));
    }

    #[tokio::test]
    async fn bindings_list_env_from_before_env() {
        let mut lookup = MockObjectLookup::new();
        lookup.expect_secret_data().returning(|_, _| {
            Ok(BTreeMap::from([(
                "FROM_SECRET".to_string(),
                SECRET_ARN.as_bytes().to_vec(),
            )]))
        });
        let m = mutator(lookup, no_image_lookups());
        let mut c = container(Some(&["echo"]), None, vec![literal("LITERAL", GCP_SECRET)]);
        c.env_from = Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: "bulk".to_string(),
                optional: None,
            }),
            ..Default::default()
        }]);

        let bindings = m.collect_bindings(&c, "default").await.unwrap();
        let names: Vec<_> = bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["FROM_SECRET", "LITERAL"]);
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[tokio::test]
    async fn missing_required_secret_fails_and_leaves_container_unchanged() {
        let mut lookup = MockObjectLookup::new();
        lookup
            .expect_secret_data()
            .returning(|ns, name| Err(Error::not_found("Secret", ns, name)));
        let m = mutator(lookup, no_image_lookups());
        let mut c = container(Some(&["echo"]), None, vec![literal("S", SECRET_ARN)]);
        c.env_from = Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: "gone".to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }]);
        let before = c.clone();

        let err = m
            .mutate(&mut c, &PullContext::default(), "default")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(c, before);
    }

    #[tokio::test]
    async fn image_resolution_failure_leaves_container_unchanged() {
        let mut images = MockImageEntrypointResolver::new();
        images
            .expect_resolve_entrypoint()
            .returning(|image, _| Err(Error::image_resolution(image, "unauthorized")));
        let m = mutator(no_lookups(), images);
        let mut c = container(None, None, vec![literal("S", SECRET_ARN)]);
        let before = c.clone();

        let err = m
            .mutate(&mut c, &PullContext::default(), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImageResolution { .. }));
        assert_eq!(c, before);
    }

    #[tokio::test]
    async fn missing_image_without_command_is_an_error() {
        let m = mutator(no_lookups(), no_image_lookups());
        let mut c = container(None, None, vec![literal("S", SECRET_ARN)]);
        c.image = None;

        let err = m
            .mutate(&mut c, &PullContext::default(), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImageResolution { .. }));
    }

    #[test]
    fn backends_are_listed_once_in_first_seen_order() {
        let bindings = vec![
            EnvironmentBinding::new("A", "gcp:secretmanager:projects/p/secrets/a"),
            EnvironmentBinding::new(
                "B",
                "arn:aws:secretsmanager:us-east-1:123456789012:secret:b",
            ),
            EnvironmentBinding::new("C", "gcp:secretmanager:projects/p/secrets/c"),
        ];
        assert_eq!(
            backends(&bindings),
            vec!["gcp-secret-manager", "aws-secrets-manager"]
        );
    }
}
