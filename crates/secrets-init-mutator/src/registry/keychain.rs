//! Registry credentials from Kubernetes pull secrets
//!
//! Candidate secrets are tried in a fixed order: the pod's own
//! `imagePullSecrets`, then those of its service account, then the
//! configured default secret. The first docker config entry matching the
//! registry host wins; no match means an anonymous pull.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use oci_client::secrets::RegistryAuth;
use serde::Deserialize;
use tracing::{debug, warn};

use secrets_init_common::Result;

use super::PullContext;
use crate::lookup::ObjectLookup;

/// Host Docker Hub images resolve to
const DOCKER_HUB: &str = "docker.io";

/// Alternate names of Docker Hub found in docker config files
const DOCKER_HUB_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

/// Username/password pair for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// Registry username
    pub username: String,
    /// Registry password or token
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl From<RegistryCredentials> for RegistryAuth {
    fn from(creds: RegistryCredentials) -> Self {
        RegistryAuth::Basic(creds.username, creds.password)
    }
}

/// `.dockerconfigjson` layout
#[derive(Debug, Deserialize)]
struct DockerConfig {
    auths: BTreeMap<String, DockerAuthEntry>,
}

/// One registry entry of a docker config file
#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuthEntry {
    fn credentials(&self) -> Option<RegistryCredentials> {
        if let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(RegistryCredentials {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Parse docker config bytes into `host -> entry`.
///
/// Accepts the `{"auths": {...}}` layout and the legacy `.dockercfg` flat map.
fn parse_docker_config(raw: &[u8]) -> Option<BTreeMap<String, DockerAuthEntry>> {
    if let Ok(config) = serde_json::from_slice::<DockerConfig>(raw) {
        return Some(config.auths);
    }
    serde_json::from_slice::<BTreeMap<String, DockerAuthEntry>>(raw).ok()
}

/// Reduce a registry key or reference host to a comparable form
fn normalize_host(raw: &str) -> String {
    let without_scheme = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase();

    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DOCKER_HUB.to_string()
    } else {
        host
    }
}

/// Find credentials for `registry` in a parsed docker config
fn credentials_for(
    entries: &BTreeMap<String, DockerAuthEntry>,
    registry: &str,
) -> Option<RegistryCredentials> {
    let wanted = normalize_host(registry);
    entries
        .iter()
        .filter(|(host, _)| normalize_host(host) == wanted)
        .find_map(|(_, entry)| entry.credentials())
}

/// Secret reference as `(namespace, name)`
type SecretRef = (String, String);

/// Pull secret resolver for registry authentication
pub struct Keychain {
    lookup: Arc<dyn ObjectLookup>,
    docker_config_json_key: String,
    default_secret: Option<SecretRef>,
}

impl Keychain {
    /// Create a keychain reading `docker_config_json_key` out of pull secrets.
    ///
    /// `default_secret` is `(namespace, name)` of a secret consulted after
    /// the pod's own secrets.
    pub fn new(
        lookup: Arc<dyn ObjectLookup>,
        docker_config_json_key: impl Into<String>,
        default_secret: Option<(String, String)>,
    ) -> Self {
        Self {
            lookup,
            docker_config_json_key: docker_config_json_key.into(),
            default_secret,
        }
    }

    /// Resolve the auth used to pull from `registry` on behalf of a pod
    pub async fn auth_for(&self, registry: &str, context: &PullContext) -> Result<RegistryAuth> {
        for (namespace, name) in self.candidate_secrets(context).await? {
            let data = match self.lookup.secret_data(&namespace, &name).await {
                Ok(data) => data,
                Err(e) if e.is_not_found() => {
                    debug!(namespace = %namespace, secret = %name, "pull secret not found, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(raw) = data.get(&self.docker_config_json_key) else {
                debug!(
                    namespace = %namespace,
                    secret = %name,
                    key = %self.docker_config_json_key,
                    "pull secret lacks docker config key"
                );
                continue;
            };
            let Some(entries) = parse_docker_config(raw) else {
                warn!(namespace = %namespace, secret = %name, "unparseable docker config in pull secret");
                continue;
            };

            if let Some(creds) = credentials_for(&entries, registry) {
                debug!(
                    registry = %registry,
                    namespace = %namespace,
                    secret = %name,
                    "using pull secret credentials"
                );
                return Ok(creds.into());
            }
        }

        debug!(registry = %registry, "no matching pull secret, pulling anonymously");
        Ok(RegistryAuth::Anonymous)
    }

    async fn candidate_secrets(&self, context: &PullContext) -> Result<Vec<SecretRef>> {
        let mut candidates: Vec<SecretRef> = context
            .image_pull_secrets
            .iter()
            .map(|name| (context.namespace.clone(), name.clone()))
            .collect();

        match self
            .lookup
            .service_account_pull_secrets(&context.namespace, &context.service_account)
            .await
        {
            Ok(names) => candidates.extend(
                names
                    .into_iter()
                    .map(|name| (context.namespace.clone(), name)),
            ),
            Err(e) if e.is_not_found() => {
                debug!(
                    namespace = %context.namespace,
                    service_account = %context.service_account,
                    "service account not found, skipping its pull secrets"
                );
            }
            Err(e) => return Err(e),
        }

        if let Some(default) = &self.default_secret {
            candidates.push(default.clone());
        }
        Ok(candidates)
    }
}
