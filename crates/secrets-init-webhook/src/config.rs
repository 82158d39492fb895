//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use secrets_init_common::telemetry::{LogLevel, TelemetryConfig};
use secrets_init_common::{
    Result, DEFAULT_DOCKER_CONFIG_JSON_KEY, DEFAULT_HELPER_IMAGE, DEFAULT_LISTEN_ADDRESS,
    DEFAULT_VOLUME_NAME, DEFAULT_VOLUME_PATH, SERVICE_NAME,
};
use secrets_init_mutator::{MutationConfig, PullPolicy, RegistryConfig, SecretProvider};

use crate::server::ServeConfig;

/// kube-secrets-init - wrap pod entrypoints with the secrets-init helper
#[derive(Parser, Debug)]
#[command(name = "secrets-init-webhook", version, about, long_about = None)]
pub struct Cli {
    /// Log level (debug, info, warning, error, fatal, panic)
    #[arg(long, env = "LOG_LEVEL", default_value = "warning", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    pub json: bool,

    /// OTLP collector endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the mutating admission webhook server
    Server(ServerArgs),
}

/// Secret manager selector accepted by `--provider`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// AWS Secrets Manager and SSM Parameter Store
    #[default]
    Aws,
    /// GCP Secret Manager
    Google,
}

impl From<ProviderArg> for SecretProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Aws => SecretProvider::Aws,
            ProviderArg::Google => SecretProvider::Google,
        }
    }
}

/// Pull policy accepted by `--pull-policy`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PullPolicyArg {
    /// Always pull
    #[value(name = "Always")]
    Always,
    /// Pull when missing on the node
    #[default]
    #[value(name = "IfNotPresent")]
    IfNotPresent,
    /// Never pull
    #[value(name = "Never")]
    Never,
}

impl From<PullPolicyArg> for PullPolicy {
    fn from(arg: PullPolicyArg) -> Self {
        match arg {
            PullPolicyArg::Always => PullPolicy::Always,
            PullPolicyArg::IfNotPresent => PullPolicy::IfNotPresent,
            PullPolicyArg::Never => PullPolicy::Never,
        }
    }
}

/// Arguments of the `server` subcommand
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address the webhook listens on
    #[arg(
        long,
        env = "LISTEN_ADDRESS",
        default_value = DEFAULT_LISTEN_ADDRESS,
        value_parser = parse_listen_address
    )]
    pub listen_address: SocketAddr,

    /// Former Prometheus listener; metrics are exported over OTLP
    #[arg(long, env = "TELEMETRY_LISTEN_ADDRESS", hide = true)]
    pub telemetry_listen_address: Option<String>,

    /// TLS certificate file (PEM)
    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,

    /// TLS private key file (PEM)
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE")]
    pub tls_private_key_file: Option<PathBuf>,

    /// Image carrying the secrets-init binary
    #[arg(long, env = "SECRETS_INIT_IMAGE", default_value = DEFAULT_HELPER_IMAGE)]
    pub image: String,

    /// Pull policy of the injected init container
    #[arg(long, env = "PULL_POLICY", value_enum, ignore_case = true, default_value_t = PullPolicyArg::IfNotPresent)]
    pub pull_policy: PullPolicyArg,

    /// Skip TLS verification when talking to image registries
    #[arg(long, env = "REGISTRY_SKIP_VERIFY")]
    pub registry_skip_verify: bool,

    /// Key of the docker config inside image pull secrets
    #[arg(long, env = "DOCKER_CONFIG_JSON_KEY", default_value = DEFAULT_DOCKER_CONFIG_JSON_KEY)]
    pub docker_config_json_key: String,

    /// Image pull secret used when a pod's own secrets do not match
    #[arg(long, env = "DEFAULT_IMAGE_PULL_SECRET", alias = "default_image_pull_secret")]
    pub default_image_pull_secret: Option<String>,

    /// Namespace of the default image pull secret
    #[arg(
        long,
        env = "DEFAULT_IMAGE_PULL_SECRET_NAMESPACE",
        alias = "default_image_pull_secret_namespace"
    )]
    pub default_image_pull_secret_namespace: Option<String>,

    /// Name of the shared volume holding the helper binary
    #[arg(long, env = "VOLUME_NAME", default_value = DEFAULT_VOLUME_NAME)]
    pub volume_name: String,

    /// Mount path of the shared volume
    #[arg(long, env = "VOLUME_PATH", default_value = DEFAULT_VOLUME_PATH)]
    pub volume_path: String,

    /// Secret manager the helper resolves references against
    #[arg(short = 'p', long, env = "PROVIDER", value_enum, ignore_case = true, default_value_t = ProviderArg::Aws)]
    pub provider: ProviderArg,
}

/// Parse a listen address, reading a bare `:port` as all interfaces
fn parse_listen_address(value: &str) -> std::result::Result<SocketAddr, String> {
    let full = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };
    full.parse()
        .map_err(|e| format!("invalid listen address {value:?}: {e}"))
}

impl Cli {
    /// Telemetry settings derived from the global flags
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: SERVICE_NAME.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone().filter(|e| !e.is_empty()),
            log_level: LogLevel::parse_lenient(&self.log_level),
            json: self.json,
        }
    }
}

impl ServerArgs {
    /// Pod rewriting settings
    pub fn mutation_config(&self) -> MutationConfig {
        MutationConfig {
            provider: self.provider.into(),
            helper_image: self.image.clone(),
            pull_policy: self.pull_policy.into(),
            volume_name: self.volume_name.clone(),
            volume_path: self.volume_path.clone(),
        }
    }

    /// Registry access settings
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            skip_verify: self.registry_skip_verify,
            docker_config_json_key: self.docker_config_json_key.clone(),
            default_image_pull_secret: self.default_image_pull_secret.clone(),
            default_image_pull_secret_namespace: self.default_image_pull_secret_namespace.clone(),
        }
    }

    /// Listener settings, rejecting a half-specified TLS pair
    pub fn serve_config(&self) -> Result<ServeConfig> {
        ServeConfig::new(
            self.listen_address,
            self.tls_cert_file.clone(),
            self.tls_private_key_file.clone(),
        )
    }
}
