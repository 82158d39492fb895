//! OCI registry client for image config blobs

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use oci_client::client::ClientConfig;
use oci_client::{Client, Reference};
use serde::Deserialize;
use tracing::{debug, instrument};

use secrets_init_common::metrics::IMAGE_FETCH_DURATION;
use secrets_init_common::{Error, Result, DEFAULT_DOCKER_CONFIG_JSON_KEY};

use super::{ImageConfigFetcher, ImageEntrypointConfig, Keychain, PullContext};
use crate::lookup::ObjectLookup;

/// Registry access settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Accept self-signed or otherwise invalid registry certificates
    pub skip_verify: bool,
    /// Key holding the docker config inside pull secrets
    pub docker_config_json_key: String,
    /// Pull secret consulted after the pod's own secrets
    pub default_image_pull_secret: Option<String>,
    /// Namespace of the default pull secret
    pub default_image_pull_secret_namespace: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            skip_verify: false,
            docker_config_json_key: DEFAULT_DOCKER_CONFIG_JSON_KEY.to_string(),
            default_image_pull_secret: None,
            default_image_pull_secret_namespace: None,
        }
    }
}

impl RegistryConfig {
    /// `(namespace, name)` of the default pull secret, when both halves are set
    pub fn default_secret(&self) -> Option<(String, String)> {
        let name = self
            .default_image_pull_secret
            .as_deref()
            .filter(|n| !n.is_empty())?;
        let namespace = self
            .default_image_pull_secret_namespace
            .as_deref()
            .filter(|n| !n.is_empty())?;
        Some((namespace.to_string(), name.to_string()))
    }
}

/// Image config blob, reduced to the fields that decide the default process
#[derive(Debug, Default, Deserialize)]
struct ImageConfigFile {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

/// Decode `Entrypoint`/`Cmd` out of an image config blob.
///
/// Missing or `null` values decode to empty sequences.
fn decode_image_config(raw: &str) -> std::result::Result<ImageEntrypointConfig, serde_json::Error> {
    let file: ImageConfigFile = serde_json::from_str(raw)?;
    let config = file.config.unwrap_or_default();
    Ok(ImageEntrypointConfig {
        entrypoint: config.entrypoint.unwrap_or_default(),
        cmd: config.cmd.unwrap_or_default(),
    })
}

/// Fetches image configs over the OCI distribution API
pub struct OciRegistryFetcher {
    client: Client,
    keychain: Keychain,
}

impl OciRegistryFetcher {
    /// Create a fetcher that reads pull secrets through `lookup`
    pub fn new(config: &RegistryConfig, lookup: Arc<dyn ObjectLookup>) -> Self {
        let client = Client::new(ClientConfig {
            accept_invalid_certificates: config.skip_verify,
            ..Default::default()
        });
        let keychain = Keychain::new(
            lookup,
            config.docker_config_json_key.clone(),
            config.default_secret(),
        );
        Self { client, keychain }
    }
}

#[async_trait]
impl ImageConfigFetcher for OciRegistryFetcher {
    #[instrument(skip(self, context), fields(namespace = %context.namespace))]
    async fn fetch(&self, image: &str, context: &PullContext) -> Result<ImageEntrypointConfig> {
        let reference = image
            .parse::<Reference>()
            .map_err(|e| Error::image_resolution(image, format!("invalid image reference: {e}")))?;

        let auth = self
            .keychain
            .auth_for(reference.resolve_registry(), context)
            .await?;

        let started = Instant::now();
        let result = self.client.pull_manifest_and_config(&reference, &auth).await;
        IMAGE_FETCH_DURATION.record(started.elapsed().as_secs_f64(), &[]);

        let (_manifest, digest, raw_config) = result.map_err(|e| {
            Error::image_resolution(image, format!("failed to fetch image config: {e}"))
        })?;

        let config = decode_image_config(&raw_config).map_err(|e| {
            Error::image_resolution(image, format!("malformed image config: {e}"))
        })?;
        debug!(
            image = %image,
            digest = %digest,
            entrypoint = ?config.entrypoint,
            cmd = ?config.cmd,
            "fetched image config"
        );
        Ok(config)
    }
}
