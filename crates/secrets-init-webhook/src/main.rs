//! kube-secrets-init webhook binary

use clap::Parser;

use secrets_init_common::telemetry::init_telemetry;
use secrets_init_webhook::config::{Cli, Commands};
use secrets_init_webhook::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Webhook TLS and the registry client share one rustls provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(cli.telemetry_config())
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting kube-secrets-init");

    match cli.command {
        Commands::Server(args) => server::run(args).await?,
    }
    Ok(())
}
