//! Image default entrypoint resolution
//!
//! Containers that declare no `command` start with their image's
//! `Entrypoint`/`Cmd`. Those come from the registry, so resolution is split
//! into a network [`ImageConfigFetcher`] and a [`CachingResolver`] that
//! answers repeated images from an in-process [`ImageCache`].

mod cache;
mod keychain;
mod oci;

pub use cache::{ImageCache, InMemoryImageCache};
pub use keychain::{Keychain, RegistryCredentials};
pub use oci::{OciRegistryFetcher, RegistryConfig};

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodSpec;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use secrets_init_common::metrics::record_image_cache;
use secrets_init_common::Result;

/// Service account Kubernetes assigns when a pod names none
const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Default process of an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageEntrypointConfig {
    /// Image `Entrypoint`
    pub entrypoint: Vec<String>,
    /// Image `Cmd`
    pub cmd: Vec<String>,
}

/// Pod-level identity used to authenticate registry pulls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullContext {
    /// Namespace of the admitted pod
    pub namespace: String,
    /// Service account the pod runs as
    pub service_account: String,
    /// Names of the pod's `imagePullSecrets`
    pub image_pull_secrets: Vec<String>,
}

impl PullContext {
    /// Build the pull context of a pod spec
    pub fn from_pod_spec(spec: &PodSpec, namespace: &str) -> Self {
        let service_account = spec
            .service_account_name
            .clone()
            .or_else(|| spec.service_account.clone())
            .filter(|sa| !sa.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());

        Self {
            namespace: namespace.to_string(),
            service_account,
            image_pull_secrets: spec
                .image_pull_secrets
                .iter()
                .flatten()
                .map(|r| r.name.clone())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }
}

/// Resolves an image reference to its default entrypoint
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageEntrypointResolver: Send + Sync {
    /// Resolve `image` using the pull identity of the admitted pod
    async fn resolve_entrypoint(
        &self,
        image: &str,
        context: &PullContext,
    ) -> Result<ImageEntrypointConfig>;
}

/// Fetches image configuration from a registry, uncached
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageConfigFetcher: Send + Sync {
    /// Download and decode the config blob of `image`
    async fn fetch(&self, image: &str, context: &PullContext) -> Result<ImageEntrypointConfig>;
}

/// Cache-first resolver
///
/// A hit answers without network I/O. A miss fetches, stores on success and
/// returns; failures are never cached so the next request retries the fetch.
pub struct CachingResolver<F> {
    fetcher: F,
    cache: Arc<dyn ImageCache>,
}

impl<F: ImageConfigFetcher> CachingResolver<F> {
    /// Create a resolver answering from `cache` before calling `fetcher`
    pub fn new(fetcher: F, cache: Arc<dyn ImageCache>) -> Self {
        Self { fetcher, cache }
    }
}

#[async_trait]
impl<F: ImageConfigFetcher> ImageEntrypointResolver for CachingResolver<F> {
    async fn resolve_entrypoint(
        &self,
        image: &str,
        context: &PullContext,
    ) -> Result<ImageEntrypointConfig> {
        if let Some(config) = self.cache.get(image) {
            record_image_cache(true);
            debug!(image = %image, "image config cache hit");
            return Ok(config);
        }
        record_image_cache(false);

        let config = self.fetcher.fetch(image, context).await?;
        self.cache.put(image, config.clone());
        debug!(
            image = %image,
            entrypoint = ?config.entrypoint,
            cmd = ?config.cmd,
            "cached image config"
        );
        Ok(config)
    }
}
