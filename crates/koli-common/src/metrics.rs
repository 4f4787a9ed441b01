//! Metrics for Koli controllers
//!
//! Provides OpenTelemetry instruments for:
//! - Storage claim provisioning outcomes
//! - Work queue activity (adds, retries, depth)
//!
//! Instruments are no-ops until a meter provider is installed by
//! [`crate::telemetry::init_telemetry`].

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// Global meter for Koli metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("koli"));

/// Counter of storage claims created for deployments
pub static PVC_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("koli_pvc_created_total")
        .with_description("Total number of persistent volume claims created")
        .with_unit("{claims}")
        .build()
});

/// Counter of storage claim creations that failed
pub static PVC_FAILED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("koli_pvc_failed_total")
        .with_description("Total number of failed persistent volume claim creations")
        .with_unit("{claims}")
        .build()
});

/// Counter of keys added to a work queue
///
/// Labels:
/// - `queue`: queue name
pub static WORKQUEUE_ADDS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("koli_workqueue_adds_total")
        .with_description("Total number of keys added to the work queue")
        .with_unit("{keys}")
        .build()
});

/// Counter of rate-limited re-adds after a failed sync
///
/// Labels:
/// - `queue`: queue name
pub static WORKQUEUE_RETRIES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("koli_workqueue_retries_total")
        .with_description("Total number of retries handled by the work queue")
        .with_unit("{retries}")
        .build()
});

/// Gauge of keys waiting in a work queue
///
/// Labels:
/// - `queue`: queue name
pub static WORKQUEUE_DEPTH: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("koli_workqueue_depth")
        .with_description("Current depth of the work queue")
        .with_unit("{keys}")
        .build()
});

/// Record a key added to `queue`
pub fn record_queue_add(queue: &str) {
    WORKQUEUE_ADDS.add(1, &[KeyValue::new("queue", queue.to_string())]);
}

/// Record a rate-limited retry on `queue`
pub fn record_queue_retry(queue: &str) {
    WORKQUEUE_RETRIES.add(1, &[KeyValue::new("queue", queue.to_string())]);
}

/// Record the current depth of `queue`
pub fn record_queue_depth(queue: &str, depth: usize) {
    WORKQUEUE_DEPTH.record(depth as u64, &[KeyValue::new("queue", queue.to_string())]);
}
