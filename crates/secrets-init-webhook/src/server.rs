//! HTTP(S) serving of the webhook router

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use tracing::{info, warn};

use secrets_init_common::{Error, Result};
use secrets_init_mutator::{
    CachingResolver, InMemoryImageCache, KubeObjectLookup, ObjectLookup, OciRegistryFetcher,
    PodMutator,
};

use crate::config::ServerArgs;
use crate::webhook::{webhook_router, WebhookState};

/// Time given to in-flight requests after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Certificate and key file paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    /// Socket address to bind
    pub listen_address: SocketAddr,
    /// TLS material; plain HTTP when `None`
    pub tls: Option<TlsFiles>,
}

impl ServeConfig {
    /// Build listener settings. Cert and key must be given together or not at all.
    pub fn new(
        listen_address: SocketAddr,
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Self> {
        let tls = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::config(
                    "--tls-cert-file requires --tls-private-key-file",
                ))
            }
            (None, Some(_)) => {
                return Err(Error::config(
                    "--tls-private-key-file requires --tls-cert-file",
                ))
            }
        };
        Ok(Self {
            listen_address,
            tls,
        })
    }
}

/// Build every collaborator from the server flags and serve until shut down
pub async fn run(args: ServerArgs) -> Result<()> {
    let serve_config = args.serve_config()?;
    if let Some(addr) = &args.telemetry_listen_address {
        warn!(
            addr = %addr,
            "--telemetry-listen-address is ignored, metrics are exported over OTLP"
        );
    }

    let client = Client::try_default().await?;
    let lookup: Arc<dyn ObjectLookup> = Arc::new(KubeObjectLookup::new(client));

    let fetcher = OciRegistryFetcher::new(&args.registry_config(), lookup.clone());
    let images = Arc::new(CachingResolver::new(
        fetcher,
        Arc::new(InMemoryImageCache::new()),
    ));
    let mutator = PodMutator::new(lookup, images, args.mutation_config());

    let router = webhook_router(Arc::new(WebhookState::new(mutator)));
    serve(serve_config, router).await
}

/// Serve `router` over TLS or plain HTTP
pub async fn serve(config: ServeConfig, router: Router) -> Result<()> {
    let addr = config.listen_address;

    match config.tls {
        Some(files) => {
            let tls = RustlsConfig::from_pem_file(&files.cert, &files.key)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "tls",
                        format!("failed to load {}: {e}", files.cert.display()),
                    )
                })?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                }
            });

            info!(addr = %addr, "serving webhook over HTTPS");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .map_err(|e| Error::internal_with_context("server", e.to_string()))
        }
        None => {
            warn!(addr = %addr, "no TLS certificate configured, serving plain HTTP");
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| Error::internal_with_context("server", format!("bind {addr}: {e}")))?;
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| Error::internal_with_context("server", e.to_string()))
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:8443".parse().unwrap()
    }

    #[test]
    fn full_pair_enables_tls() {
        let config = ServeConfig::new(
            addr(),
            Some(PathBuf::from("/tls/tls.crt")),
            Some(PathBuf::from("/tls/tls.key")),
        )
        .unwrap();
        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert: PathBuf::from("/tls/tls.crt"),
                key: PathBuf::from("/tls/tls.key"),
            })
        );
    }

    #[test]
    fn no_pair_is_plain_http() {
        let config = ServeConfig::new(addr(), None, None).unwrap();
        assert!(config.tls.is_none());
    }

    #[test]
    fn key_without_cert_is_rejected() {
        let err = ServeConfig::new(addr(), None, Some(PathBuf::from("/tls/tls.key"))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn missing_tls_files_fail_before_binding() {
        let config = ServeConfig::new(
            addr(),
            Some(PathBuf::from("/nonexistent/tls.crt")),
            Some(PathBuf::from("/nonexistent/tls.key")),
        )
        .unwrap();
        let err = serve(config, Router::new()).await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }
}
