//! Kubernetes Event recording for the Koli controllers.
//!
//! Controllers receive an [`EventRecorder`] at construction instead of
//! reaching for a process-wide broadcaster, so tests can capture what was
//! recorded and production code publishes through
//! `kube::runtime::events::Recorder`.
//!
//! Recording is fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::{info, warn};

/// Records human-readable diagnostic events against objects.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event about `regarding`.
    ///
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (e.g. "PlanNotFound")
    /// * `note` - Human-readable message
    async fn record(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Production recorder wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// Create a recorder reporting as `component`
    /// (e.g. "app-manager-controller").
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        info!(
            kind = regarding.kind.as_deref().unwrap_or_default(),
            namespace = regarding.namespace.as_deref().unwrap_or_default(),
            name = regarding.name.as_deref().unwrap_or_default(),
            reason,
            note = %note,
            "Recording event"
        );
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Recorder that drops every event.
pub struct NoopEventRecorder;

#[async_trait]
impl EventRecorder for NoopEventRecorder {
    async fn record(
        &self,
        _regarding: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: String,
    ) {
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// A deployment references a storage plan that does not exist
    pub const PLAN_NOT_FOUND: &str = "PlanNotFound";
    /// Creating the storage claim failed for a reason other than a collision
    pub const PROVISION_ERROR: &str = "ProvisionError";
    /// A deployment asked for a build without the required metadata
    pub const MISSING_ANNOTATION_KEY: &str = "MissingAnnotationKey";
    /// A release was created
    pub const CREATED: &str = "Created";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_recorder_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventRecorder>();
    }

    #[test]
    fn reasons_match_what_operators_filter_on() {
        assert_eq!(reasons::PLAN_NOT_FOUND, "PlanNotFound");
        assert_eq!(reasons::MISSING_ANNOTATION_KEY, "MissingAnnotationKey");
        assert_eq!(reasons::PROVISION_ERROR, "ProvisionError");
    }

    #[tokio::test]
    async fn noop_recorder_does_not_panic() {
        NoopEventRecorder
            .record(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::PLAN_NOT_FOUND,
                "plan missing".to_string(),
            )
            .await;
    }
}
