//! Mutating admission webhook
//!
//! Exposes `POST /pods` for the MutatingWebhookConfiguration and
//! `GET /healthz` for probes.

pub mod pod;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use secrets_init_mutator::PodMutator;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Mutator applied to admitted pods
    pub mutator: PodMutator,
}

impl WebhookState {
    /// Create webhook state around a pod mutator
    pub fn new(mutator: PodMutator) -> Self {
        Self { mutator }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/pods", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
