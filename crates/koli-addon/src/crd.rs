//! Addon CRD: a declared backing service for an app

use std::str::FromStr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::EnvVar;
use koli_common::Error;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::app::{AddonApp, Memcached, Redis};
use crate::client::AddonClient;
use crate::kind::AddonKind;

/// Tag used when the declaration leaves the version empty
pub const DEFAULT_VERSION: &str = "latest";

/// Addon declares a stateful backing service (cache, database).
///
/// Example:
/// ```yaml
/// apiVersion: platform.koli.io/v1alpha1
/// kind: Addon
/// metadata:
///   name: sessions
///   namespace: prod-coyote-acme
/// spec:
///   type: redis
///   baseImage: redis
///   version: "7.2"
///   replicas: 1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.koli.io",
    version = "v1alpha1",
    kind = "Addon",
    plural = "addons",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Catalog entry, e.g. `redis`
    #[serde(rename = "type")]
    pub addon_type: String,

    /// Image repository without tag
    pub base_image: String,

    /// Image tag; empty means `latest`
    #[serde(default)]
    pub version: String,

    /// Desired replicas; values below one mean one
    #[serde(default)]
    pub replicas: i32,

    /// Service port; zero means the catalog default for the type
    #[serde(default)]
    pub port: i32,

    /// Environment passed to the add-on container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<AddonEnvVar>,

    /// Extra arguments for the add-on process
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// A literal environment variable
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AddonEnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}

impl From<&AddonEnvVar> for EnvVar {
    fn from(var: &AddonEnvVar) -> Self {
        EnvVar {
            name: var.name.clone(),
            value: Some(var.value.clone()),
            value_from: None,
        }
    }
}

impl Addon {
    /// Full image reference, `baseImage:version`
    pub fn image(&self) -> String {
        let version = if self.spec.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.spec.version
        };
        format!("{}:{}", self.spec.base_image, version)
    }

    /// Replica count with a floor of one
    pub fn effective_replicas(&self) -> i32 {
        self.spec.replicas.max(1)
    }

    /// Parsed catalog entry
    pub fn addon_kind(&self) -> Result<AddonKind, Error> {
        AddonKind::from_str(&self.spec.addon_type)
    }

    /// Service port, falling back to the catalog default
    pub fn effective_port(&self) -> Result<i32, Error> {
        if self.spec.port > 0 {
            return Ok(self.spec.port);
        }
        Ok(self.addon_kind()?.default_port())
    }

    /// Resolve the implementation for this add-on's type
    ///
    /// Types outside the catalog, and catalog entries without an
    /// implementation, fail with [`Error::UnsupportedAddon`].
    pub fn app(&self, client: Arc<dyn AddonClient>) -> Result<AddonApp, Error> {
        match self.addon_kind()? {
            AddonKind::Redis => Ok(AddonApp::Redis(Redis::new(self.clone(), client))),
            AddonKind::Memcached => Ok(AddonApp::Memcached(Memcached::new(self.clone(), client))),
            AddonKind::MySql => Err(Error::unsupported_addon(&self.spec.addon_type)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::addon;

    #[test]
    fn image_defaults_to_latest() {
        let mut addon = addon("redis");
        assert_eq!(addon.image(), "redis:latest");
        addon.spec.version = "7.2".to_string();
        assert_eq!(addon.image(), "redis:7.2");
    }

    #[test]
    fn replicas_have_a_floor_of_one() {
        let mut addon = addon("redis");
        assert_eq!(addon.effective_replicas(), 1);
        addon.spec.replicas = -3;
        assert_eq!(addon.effective_replicas(), 1);
        addon.spec.replicas = 3;
        assert_eq!(addon.effective_replicas(), 3);
        assert_eq!(addon.spec.replicas, 3, "stored spec is untouched");
    }

    #[test]
    fn port_falls_back_to_catalog_default() {
        let mut addon = addon("memcached");
        assert_eq!(addon.effective_port().expect("known type"), 11211);
        addon.spec.port = 12000;
        assert_eq!(addon.effective_port().expect("known type"), 12000);
    }

    #[test]
    fn spec_uses_wire_names() {
        let json = serde_json::to_value(&addon("redis").spec).expect("serialize");
        assert_eq!(json["type"], "redis");
        assert_eq!(json["baseImage"], "redis");
        assert!(json.get("env").is_none());
    }
}
