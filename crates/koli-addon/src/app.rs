//! Uniform capability contract over the implemented add-on kinds

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use koli_common::Error;

use crate::client::AddonClient;
use crate::crd::Addon;
pub use crate::memcached::Memcached;
pub use crate::redis::Redis;

/// Operations every implemented add-on supports
#[async_trait]
pub trait AddonCapability: Send + Sync {
    /// Create the ConfigMap holding the add-on's configuration files
    async fn create_config(&self) -> Result<(), Error>;

    /// Create the headless Service in front of the workload
    async fn create_service(&self) -> Result<(), Error>;

    /// Create the StatefulSet running the add-on
    async fn create_stateful_workload(&self) -> Result<(), Error>;

    /// Replace `old` with the StatefulSet the current declaration produces
    async fn update_stateful_workload(&self, old: &StatefulSet) -> Result<(), Error>;

    /// Delete every object created for the add-on
    async fn delete(&self) -> Result<(), Error>;

    /// The declaration this instance was built from
    fn addon(&self) -> &Addon;
}

/// An implemented add-on, resolved from [`Addon::app`]
pub enum AddonApp {
    /// Redis key-value store
    Redis(Redis),
    /// Memcached cache
    Memcached(Memcached),
}

impl AddonApp {
    fn capability(&self) -> &dyn AddonCapability {
        match self {
            AddonApp::Redis(app) => app as &dyn AddonCapability,
            AddonApp::Memcached(app) => app,
        }
    }

    /// Create config, service and workload in that order
    pub async fn provision(&self) -> Result<(), Error> {
        self.create_config().await?;
        self.create_service().await?;
        self.create_stateful_workload().await
    }
}

#[async_trait]
impl AddonCapability for AddonApp {
    async fn create_config(&self) -> Result<(), Error> {
        self.capability().create_config().await
    }

    async fn create_service(&self) -> Result<(), Error> {
        self.capability().create_service().await
    }

    async fn create_stateful_workload(&self) -> Result<(), Error> {
        self.capability().create_stateful_workload().await
    }

    async fn update_stateful_workload(&self, old: &StatefulSet) -> Result<(), Error> {
        self.capability().update_stateful_workload(old).await
    }

    async fn delete(&self) -> Result<(), Error> {
        self.capability().delete().await
    }

    fn addon(&self) -> &Addon {
        self.capability().addon()
    }
}

/// Resolve `addon` and provision it
pub async fn provision(addon: &Addon, client: Arc<dyn AddonClient>) -> Result<(), Error> {
    addon.app(client)?.provision().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAddonClient;
    use crate::testing::addon;
    use mockall::Sequence;

    #[tokio::test]
    async fn story_redis_is_provisioned_config_first() {
        let mut client = MockAddonClient::new();
        let mut seq = Sequence::new();
        client
            .expect_create_config_map()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        client
            .expect_create_service()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        client
            .expect_create_stateful_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        provision(&addon("redis"), Arc::new(client))
            .await
            .expect("provision succeeds");
    }

    #[tokio::test]
    async fn story_failed_config_stops_provisioning() {
        let mut client = MockAddonClient::new();
        client
            .expect_create_config_map()
            .returning(|_| Err(Error::internal("test", "boom")));
        client.expect_create_service().never();
        client.expect_create_stateful_set().never();

        let result = provision(&addon("memcached"), Arc::new(client)).await;
        assert!(result.is_err());
    }

    #[test]
    fn mysql_is_an_explicit_unsupported_branch() {
        let client = Arc::new(MockAddonClient::new());
        let err = addon("mysql").app(client).err().expect("unsupported");
        assert!(matches!(err, Error::UnsupportedAddon { ref addon_type } if addon_type == "mysql"));
        assert_eq!(err.to_string(), "invalid add-on type (mysql)");
    }

    #[test]
    fn unknown_type_fails_at_lookup() {
        let client = Arc::new(MockAddonClient::new());
        let err = addon("postgres").app(client).err().expect("unsupported");
        assert!(matches!(err, Error::UnsupportedAddon { .. }));
    }

    #[test]
    fn resolved_app_returns_its_declaration() {
        let client = Arc::new(MockAddonClient::new());
        let app = addon("memcached").app(client).expect("known type");
        assert!(matches!(app, AddonApp::Memcached(_)));
        assert_eq!(app.addon().spec.addon_type, "memcached");
    }
}
