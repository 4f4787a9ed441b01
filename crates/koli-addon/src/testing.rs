//! Fixtures shared by the add-on tests

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{Addon, AddonSpec};

/// A namespaced add-on named `sessions` whose image repository equals its type
pub(crate) fn addon(addon_type: &str) -> Addon {
    Addon {
        metadata: ObjectMeta {
            name: Some("sessions".to_string()),
            namespace: Some("prod-coyote-acme".to_string()),
            uid: Some("uid-sessions".to_string()),
            ..Default::default()
        },
        spec: AddonSpec {
            addon_type: addon_type.to_string(),
            base_image: addon_type.to_string(),
            ..Default::default()
        },
    }
}
