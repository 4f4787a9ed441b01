//! Memcached add-on

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use koli_common::Error;
use kube::ResourceExt;
use tracing::info;

use crate::app::AddonCapability;
use crate::client::AddonClient;
use crate::crd::Addon;
use crate::kind::AddonKind;
use crate::template::{self, ContainerProfile};

/// Memory limit in megabytes passed to memcached when no args override it
const DEFAULT_MEMORY_MB: u32 = 64;

/// Memcached backed by a StatefulSet; keeps no data on disk
pub struct Memcached {
    addon: Addon,
    client: Arc<dyn AddonClient>,
}

impl Memcached {
    /// Wrap a declaration of type `memcached`
    pub fn new(addon: Addon, client: Arc<dyn AddonClient>) -> Self {
        Self { addon, client }
    }

    fn port(&self) -> i32 {
        self.addon
            .effective_port()
            .unwrap_or(AddonKind::Memcached.default_port())
    }

    fn config(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("MEMCACHED_PORT".to_string(), self.port().to_string()),
            ("MEMCACHED_MEMORY".to_string(), DEFAULT_MEMORY_MB.to_string()),
        ])
    }

    fn profile(&self) -> ContainerProfile {
        ContainerProfile {
            command: vec![
                "memcached".to_string(),
                "-p".to_string(),
                self.port().to_string(),
                "-m".to_string(),
                DEFAULT_MEMORY_MB.to_string(),
            ],
            data_path: None,
        }
    }

    fn desired_stateful_set(&self) -> StatefulSet {
        template::stateful_set(
            &self.addon,
            AddonKind::Memcached,
            self.port(),
            &self.profile(),
        )
    }
}

#[async_trait]
impl AddonCapability for Memcached {
    async fn create_config(&self) -> Result<(), Error> {
        let config_map = template::config_map(&self.addon, AddonKind::Memcached, self.config());
        self.client.create_config_map(&config_map).await
    }

    async fn create_service(&self) -> Result<(), Error> {
        let service = template::headless_service(&self.addon, AddonKind::Memcached, self.port());
        self.client.create_service(&service).await
    }

    async fn create_stateful_workload(&self) -> Result<(), Error> {
        info!(addon = %self.addon.name_any(), image = %self.addon.image(), "Creating memcached");
        self.client
            .create_stateful_set(&self.desired_stateful_set())
            .await
    }

    async fn update_stateful_workload(&self, old: &StatefulSet) -> Result<(), Error> {
        let desired = template::carry_over(self.desired_stateful_set(), old);
        self.client.replace_stateful_set(&desired).await
    }

    async fn delete(&self) -> Result<(), Error> {
        let namespace = self.addon.namespace().unwrap_or_default();
        self.client
            .delete_app(&namespace, &self.addon.name_any())
            .await
    }

    fn addon(&self) -> &Addon {
        &self.addon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAddonClient;
    use crate::testing::addon;

    #[tokio::test]
    async fn workload_runs_memcached_on_default_port() {
        let mut client = MockAddonClient::new();
        client
            .expect_create_stateful_set()
            .withf(|set| {
                let container = set
                    .spec
                    .as_ref()
                    .and_then(|s| s.template.spec.as_ref())
                    .map(|p| p.containers[0].clone());
                container.is_some_and(|c| {
                    c.command.unwrap_or_default()[..3] == ["memcached", "-p", "11211"]
                        && c.image.as_deref() == Some("memcached:latest")
                })
            })
            .times(1)
            .returning(|_| Ok(()));

        Memcached::new(addon("memcached"), Arc::new(client))
            .create_stateful_workload()
            .await
            .expect("created");
    }

    #[tokio::test]
    async fn service_errors_propagate() {
        let mut client = MockAddonClient::new();
        client
            .expect_create_service()
            .returning(|_| Err(Error::internal("test", "apiserver unavailable")));

        let result = Memcached::new(addon("memcached"), Arc::new(client))
            .create_service()
            .await;
        assert!(result.is_err());
    }
}
