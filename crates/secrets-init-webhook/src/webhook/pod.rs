//! Pod admission handling
//!
//! Decodes the admitted object, runs the pod mutator on a copy and answers
//! with an RFC 6902 patch between the original and the mutated pod.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};

use secrets_init_common::metrics::record_admission;
use secrets_init_common::Error;

use super::WebhookState;

/// Namespace assumed when neither the request nor the object carries one
const DEFAULT_NAMESPACE: &str = "default";

/// Object kinds the webhook knows how to handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionKind {
    /// Core v1 Pod
    Pod,
    /// Anything else, admitted unchanged
    Unsupported(String),
}

impl AdmissionKind {
    /// Classify the object of an admission request
    pub fn of(request: &AdmissionRequest<DynamicObject>) -> Self {
        if request.kind.group.is_empty() && request.kind.kind == "Pod" {
            AdmissionKind::Pod
        } else {
            AdmissionKind::Unsupported(request.kind.kind.clone())
        }
    }

    fn label(&self) -> &str {
        match self {
            AdmissionKind::Pod => "Pod",
            AdmissionKind::Unsupported(kind) => kind,
        }
    }
}

/// Handle a mutating admission review
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Json<AdmissionReview<DynamicObject>> {
    let started = Instant::now();

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "failed to decode admission review");
            record_admission("unknown", "invalid", started.elapsed().as_secs_f64());
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            record_admission("unknown", "invalid", started.elapsed().as_secs_f64());
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let kind = AdmissionKind::of(&request);
    let (response, result) = match &kind {
        AdmissionKind::Pod => mutate_pod(&state, &request).await,
        AdmissionKind::Unsupported(other) => {
            debug!(uid = %request.uid, kind = %other, "unsupported kind, allowing unchanged");
            (AdmissionResponse::from(&request), "unchanged")
        }
    };

    record_admission(kind.label(), result, started.elapsed().as_secs_f64());
    Json(response.into_review())
}

/// Mutate one admitted pod, returning the response and its metric label
async fn mutate_pod(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> (AdmissionResponse, &'static str) {
    let uid = request.uid.clone();

    let Some(object) = &request.object else {
        debug!(uid = %uid, "no object in request, allowing unchanged");
        return (AdmissionResponse::from(request), "unchanged");
    };

    let pod = match decode_pod(object) {
        Ok(pod) => pod,
        Err(e) => {
            error!(uid = %uid, error = %e, "failed to decode pod");
            return (AdmissionResponse::from(request).deny(e.to_string()), "denied");
        }
    };

    let namespace = request
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| pod.metadata.namespace.clone().filter(|ns| !ns.is_empty()))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let pod_name = pod
        .metadata
        .name
        .clone()
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default();

    let mut mutated = pod.clone();
    let outcome = match state
        .mutator
        .mutate_pod(&mut mutated, &namespace, request.dry_run)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(
                uid = %uid,
                namespace = %namespace,
                pod = %pod_name,
                error = %e,
                retryable = e.is_retryable(),
                "pod mutation failed, denying"
            );
            return (AdmissionResponse::from(request).deny(e.to_string()), "denied");
        }
    };

    if !outcome.mutated {
        debug!(uid = %uid, namespace = %namespace, pod = %pod_name, "no secret references");
        return (AdmissionResponse::from(request), "unchanged");
    }

    let patch = match pod_patch(&pod, &mutated) {
        Ok(patch) => patch,
        Err(e) => {
            error!(uid = %uid, error = %e, "failed to build patch");
            return (AdmissionResponse::from(request).deny(e.to_string()), "denied");
        }
    };
    if patch.0.is_empty() {
        info!(
            uid = %uid,
            namespace = %namespace,
            pod = %pod_name,
            containers = ?outcome.containers,
            "dry-run admission, no patch"
        );
        return (AdmissionResponse::from(request), "mutated");
    }

    info!(
        uid = %uid,
        namespace = %namespace,
        pod = %pod_name,
        containers = ?outcome.containers,
        patch_ops = patch.0.len(),
        "patching pod"
    );
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => (response, "mutated"),
        Err(e) => {
            error!(uid = %uid, error = %e, "failed to serialize patch");
            (
                AdmissionResponse::from(request).deny(format!("patch serialization error: {e}")),
                "denied",
            )
        }
    }
}

fn decode_pod(object: &DynamicObject) -> Result<Pod, Error> {
    let value = serde_json::to_value(object)
        .map_err(|e| Error::serialization_for_kind("Pod", e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind("Pod", e.to_string()))
}

/// JSON patch turning `original` into `mutated`
fn pod_patch(original: &Pod, mutated: &Pod) -> Result<json_patch::Patch, Error> {
    let before = serde_json::to_value(original)
        .map_err(|e| Error::serialization_for_kind("Pod", e.to_string()))?;
    let after = serde_json::to_value(mutated)
        .map_err(|e| Error::serialization_for_kind("Pod", e.to_string()))?;
    Ok(json_patch::diff(&before, &after))
}
