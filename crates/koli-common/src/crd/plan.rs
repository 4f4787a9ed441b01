//! Plan CRD: a named policy deployments opt into by label
//!
//! Storage plans declare the capacity of the claim provisioned for a
//! deployment. Plans are read-only from the controllers' point of view.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plan defines a resource policy.
///
/// Example:
/// ```yaml
/// apiVersion: platform.koli.io/v1alpha1
/// kind: Plan
/// metadata:
///   name: storage-10g
///   namespace: koli-system
/// spec:
///   type: storage
///   storage: 10Gi
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.koli.io",
    version = "v1alpha1",
    kind = "Plan",
    plural = "plans",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Storage","type":"string","jsonPath":".spec.storage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// What the plan governs
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,

    /// Capacity of the claim provisioned for storage plans (e.g. "10Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// Kinds of plan
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    /// Compute quota plan
    Compute,
    /// Persistent storage plan
    Storage,
}

impl Plan {
    /// Whether this plan provisions persistent storage
    pub fn is_storage_type(&self) -> bool {
        self.spec.plan_type == Some(PlanType::Storage)
    }
}
