//! Pod-level orchestration
//!
//! Runs the container mutator over init containers and containers, then
//! injects the bootstrap init container and the shared in-memory volume when
//! anything was rewritten. Work happens on a copy of the pod spec that is
//! committed only after every container succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, Pod, ResourceRequirements, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{debug, info};

use secrets_init_common::metrics::CONTAINERS_MUTATED;
use secrets_init_common::{Result, BOOTSTRAP_CONTAINER_NAME, HELPER_BINARY_SOURCE_PATH};

use crate::config::MutationConfig;
use crate::container::ContainerMutator;
use crate::lookup::ObjectLookup;
use crate::registry::{ImageEntrypointResolver, PullContext};
use crate::resolver::PodSpecResolver;

/// Requests and limits of the bootstrap container
const BOOTSTRAP_REQUESTS_CPU: &str = "5m";
const BOOTSTRAP_REQUESTS_MEMORY: &str = "10Mi";
const BOOTSTRAP_LIMITS_CPU: &str = "20m";
const BOOTSTRAP_LIMITS_MEMORY: &str = "50Mi";

/// Storage medium of the shared volume
const MEMORY_MEDIUM: &str = "Memory";

/// Result of mutating one pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Whether any container was (or, on dry-run, would be) rewritten
    pub mutated: bool,
    /// Names of the rewritten containers, init containers first
    pub containers: Vec<String>,
}

/// Applies secret-aware entrypoint wrapping to whole pods
#[derive(Clone)]
pub struct PodMutator {
    containers: ContainerMutator,
}

impl PodMutator {
    /// Create a pod mutator from its collaborators
    pub fn new(
        lookup: Arc<dyn ObjectLookup>,
        images: Arc<dyn ImageEntrypointResolver>,
        config: MutationConfig,
    ) -> Self {
        Self {
            containers: ContainerMutator::new(
                PodSpecResolver::new(lookup),
                images,
                Arc::new(config),
            ),
        }
    }

    /// Mutate `pod` in place.
    ///
    /// On dry-run the outcome is computed but the pod is left as it was. On
    /// error nothing is changed either.
    pub async fn mutate_pod(
        &self,
        pod: &mut Pod,
        namespace: &str,
        dry_run: bool,
    ) -> Result<MutationOutcome> {
        let Some(spec) = pod.spec.as_ref() else {
            debug!(namespace = %namespace, "pod has no spec");
            return Ok(MutationOutcome::default());
        };

        let context = PullContext::from_pod_spec(spec, namespace);
        let mut working = spec.clone();
        let mut outcome = MutationOutcome::default();

        for container in working.init_containers.iter_mut().flatten() {
            if self.containers.mutate(container, &context, namespace).await? {
                outcome.containers.push(container.name.clone());
            }
        }
        let init_mutated = outcome.containers.len();
        debug!(namespace = %namespace, count = init_mutated, "processed init containers");

        for container in working.containers.iter_mut() {
            if self.containers.mutate(container, &context, namespace).await? {
                outcome.containers.push(container.name.clone());
            }
        }
        debug!(
            namespace = %namespace,
            count = outcome.containers.len() - init_mutated,
            "processed containers"
        );

        outcome.mutated = !outcome.containers.is_empty();
        if !outcome.mutated {
            return Ok(outcome);
        }
        if dry_run {
            info!(
                namespace = %namespace,
                containers = ?outcome.containers,
                "dry-run, leaving pod unchanged"
            );
            return Ok(outcome);
        }

        let config = self.containers.config();

        let init_containers = working.init_containers.get_or_insert_with(Vec::new);
        if !init_containers
            .iter()
            .any(|c| c.name == BOOTSTRAP_CONTAINER_NAME)
        {
            init_containers.insert(0, bootstrap_container(config));
        }

        let volumes = working.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == config.volume_name) {
            volumes.push(shared_volume(config));
        }

        pod.spec = Some(working);
        CONTAINERS_MUTATED.add(outcome.containers.len() as u64, &[]);
        info!(
            namespace = %namespace,
            containers = ?outcome.containers,
            "mutated pod"
        );
        Ok(outcome)
    }
}

/// Init container copying the helper binary into the shared volume
pub fn bootstrap_container(config: &MutationConfig) -> Container {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };

    Container {
        name: BOOTSTRAP_CONTAINER_NAME.to_string(),
        image: Some(config.helper_image.clone()),
        image_pull_policy: Some(config.pull_policy.as_str().to_string()),
        args: Some(vec![
            "cp".to_string(),
            HELPER_BINARY_SOURCE_PATH.to_string(),
            config.volume_path.clone(),
        ]),
        volume_mounts: Some(vec![config.volume_mount()]),
        resources: Some(ResourceRequirements {
            requests: Some(quantities(BOOTSTRAP_REQUESTS_CPU, BOOTSTRAP_REQUESTS_MEMORY)),
            limits: Some(quantities(BOOTSTRAP_LIMITS_CPU, BOOTSTRAP_LIMITS_MEMORY)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Memory-backed volume shared by the bootstrap and mutated containers
pub fn shared_volume(config: &MutationConfig) -> Volume {
    Volume {
        name: config.volume_name.clone(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some(MEMORY_MEDIUM.to_string()),
            size_limit: None,
        }),
        ..Default::default()
    }
}
