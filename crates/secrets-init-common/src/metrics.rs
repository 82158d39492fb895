//! Metric instruments for the secrets-init webhook
//!
//! Instruments come from the global OpenTelemetry meter. Without an OTLP
//! endpoint the global provider is a no-op, so recording is always safe.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for secrets-init metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("kube-secrets-init"));

/// Counter of admission reviews handled
///
/// Labels:
/// - `kind`: admitted object kind (Pod, or the unsupported kind name)
/// - `result`: mutated, unchanged, denied, invalid
pub static ADMISSION_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secrets_init_admission_requests_total")
        .with_description("Total number of admission reviews handled")
        .with_unit("{requests}")
        .build()
});

/// Histogram of admission handling latency
pub static ADMISSION_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("secrets_init_admission_duration_seconds")
        .with_description("Duration of admission review handling in seconds")
        .with_unit("s")
        .build()
});

/// Counter of containers rewritten to start through the helper binary
pub static CONTAINERS_MUTATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secrets_init_containers_mutated_total")
        .with_description("Total number of containers rewritten")
        .with_unit("{containers}")
        .build()
});

/// Counter of image entrypoint cache lookups
///
/// Labels:
/// - `result`: hit, miss
pub static IMAGE_CACHE: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secrets_init_image_cache_total")
        .with_description("Image entrypoint cache lookups by result")
        .with_unit("{lookups}")
        .build()
});

/// Histogram of registry fetch latency
pub static IMAGE_FETCH_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("secrets_init_image_fetch_duration_seconds")
        .with_description("Duration of image config fetches from the registry in seconds")
        .with_unit("s")
        .build()
});

/// Record one handled admission review
pub fn record_admission(kind: &str, result: &'static str, seconds: f64) {
    let labels = [
        KeyValue::new("kind", kind.to_string()),
        KeyValue::new("result", result),
    ];
    ADMISSION_REQUESTS.add(1, &labels);
    ADMISSION_DURATION.record(seconds, &labels);
}

/// Record an image cache lookup
pub fn record_image_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    IMAGE_CACHE.add(1, &[KeyValue::new("result", result)]);
}
