//! Pod mutation engine for kube-secrets-init
//!
//! Decides which containers reference cloud secret-manager entries and
//! rewrites them to start through the secrets-init helper binary.

#![deny(missing_docs)]

pub mod config;
pub mod container;
pub mod detector;
pub mod lookup;
pub mod pod;
pub mod registry;
pub mod resolver;
pub mod types;

pub use config::{MutationConfig, PullPolicy, SecretProvider};
pub use container::ContainerMutator;
pub use detector::is_secret_reference;
pub use lookup::{KubeObjectLookup, ObjectLookup};
pub use pod::{MutationOutcome, PodMutator};
pub use registry::{
    CachingResolver, ImageCache, ImageEntrypointConfig, ImageEntrypointResolver,
    InMemoryImageCache, OciRegistryFetcher, PullContext, RegistryConfig,
};
pub use resolver::PodSpecResolver;
pub use types::EnvironmentBinding;
