//! Kubernetes object lookups used during mutation
//!
//! Provides a trait-based abstraction over ConfigMap, Secret and
//! ServiceAccount reads, allowing tests to mock the API server while
//! production code uses real API calls.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use kube::api::Api;
use kube::Client;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use secrets_init_common::{Error, Result};

/// Trait abstracting namespaced object reads
///
/// Every method returns [`Error::NotFound`] when the object is absent so
/// callers can apply optional-reference handling.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    /// Get the `data` of a ConfigMap
    async fn config_map_data(&self, namespace: &str, name: &str)
        -> Result<BTreeMap<String, String>>;

    /// Get the decoded `data` of a Secret
    async fn secret_data(&self, namespace: &str, name: &str)
        -> Result<BTreeMap<String, Vec<u8>>>;

    /// Get the image pull secret names attached to a ServiceAccount
    async fn service_account_pull_secrets(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>>;
}

/// Real lookup implementation backed by the Kubernetes API
pub struct KubeObjectLookup {
    client: Client,
}

impl KubeObjectLookup {
    /// Create a lookup wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLookup for KubeObjectLookup {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = api
            .get(name)
            .await
            .map_err(|e| Error::from_lookup("ConfigMap", namespace, name, e))?;
        trace!(namespace = %namespace, name = %name, "fetched ConfigMap");
        Ok(cm.data.unwrap_or_default())
    }

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| Error::from_lookup("Secret", namespace, name, e))?;
        trace!(namespace = %namespace, name = %name, "fetched Secret");

        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        if let Some(string_data) = secret.string_data {
            data.extend(string_data.into_iter().map(|(k, v)| (k, v.into_bytes())));
        }
        Ok(data)
    }

    async fn service_account_pull_secrets(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let sa = api
            .get(name)
            .await
            .map_err(|e| Error::from_lookup("ServiceAccount", namespace, name, e))?;
        Ok(sa
            .image_pull_secrets
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.name)
            .collect())
    }
}
