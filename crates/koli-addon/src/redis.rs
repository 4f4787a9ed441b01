//! Redis add-on

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
use crate::template::{self, ContainerProfile, CONFIG_MOUNT_PATH};

const CONFIG_FILE: &str = "redis.conf";
const DATA_PATH: &str = "/data";

/// Redis backed by a single-container StatefulSet
pub struct Redis {
    addon: Addon,
    client: Arc<dyn AddonClient>,
}

impl Redis {
    /// Wrap a declaration of type `redis`
    pub fn new(addon: Addon, client: Arc<dyn AddonClient>) -> Self {
        Self { addon, client }
    }

    fn port(&self) -> i32 {
        self.addon
            .effective_port()
            .unwrap_or(AddonKind::Redis.default_port())
    }

    fn config(&self) -> BTreeMap<String, String> {
        let conf = format!("port {}\ndir {DATA_PATH}\nappendonly yes\n", self.port());
        BTreeMap::from([(CONFIG_FILE.to_string(), conf)])
    }

    fn profile() -> ContainerProfile {
        ContainerProfile {
            command: vec![
                "redis-server".to_string(),
                format!("{CONFIG_MOUNT_PATH}/{CONFIG_FILE}"),
            ],
            data_path: Some(DATA_PATH),
        }
    }

    fn desired_stateful_set(&self) -> StatefulSet {
        template::stateful_set(&self.addon, AddonKind::Redis, self.port(), &Self::profile())
    }
}

#[async_trait]
impl AddonCapability for Redis {
    async fn create_config(&self) -> Result<(), Error> {
        let config_map = template::config_map(&self.addon, AddonKind::Redis, self.config());
        self.client.create_config_map(&config_map).await
    }

    async fn create_service(&self) -> Result<(), Error> {
        let service = template::headless_service(&self.addon, AddonKind::Redis, self.port());
        self.client.create_service(&service).await
    }

    async fn create_stateful_workload(&self) -> Result<(), Error> {
        info!(addon = %self.addon.name_any(), image = %self.addon.image(), "Creating redis");
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
    async fn config_listens_on_declared_port() {
        let mut client = MockAddonClient::new();
        client
            .expect_create_config_map()
            .withf(|cm| {
                cm.data
                    .as_ref()
                    .and_then(|d| d.get(CONFIG_FILE))
                    .is_some_and(|conf| conf.starts_with("port 6380\n"))
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut declared = addon("redis");
        declared.spec.port = 6380;
        Redis::new(declared, Arc::new(client))
            .create_config()
            .await
            .expect("config created");
    }

    #[tokio::test]
    async fn update_replaces_with_old_resource_version() {
        let mut client = MockAddonClient::new();
        client
            .expect_replace_stateful_set()
            .withf(|set| {
                set.metadata.resource_version.as_deref() == Some("7")
                    && set.spec.as_ref().and_then(|s| s.replicas) == Some(3)
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut declared = addon("redis");
        let redis = Redis::new(declared.clone(), Arc::new(MockAddonClient::new()));
        let mut old = redis.desired_stateful_set();
        old.metadata.resource_version = Some("7".to_string());

        declared.spec.replicas = 3;
        Redis::new(declared, Arc::new(client))
            .update_stateful_workload(&old)
            .await
            .expect("replaced");
    }

    #[tokio::test]
    async fn delete_removes_objects_by_addon_name() {
        let mut client = MockAddonClient::new();
        client
            .expect_delete_app()
            .withf(|ns, name| ns == "prod-coyote-acme" && name == "sessions")
            .times(1)
            .returning(|_, _| Ok(()));

        Redis::new(addon("redis"), Arc::new(client))
            .delete()
            .await
            .expect("deleted");
    }
}
