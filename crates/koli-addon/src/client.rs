//! Control-plane operations behind the add-on capabilities

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use koli_common::Error;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Writes issued by add-on templates
///
/// Creates treat an existing object of the same name as success, deletes
/// treat a missing object as success.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonClient: Send + Sync {
    /// Create a ConfigMap in its own namespace
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    /// Create a Service in its own namespace
    async fn create_service(&self, service: &Service) -> Result<(), Error>;

    /// Create a StatefulSet in its own namespace
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error>;

    /// Replace an existing StatefulSet, keeping its resource version
    async fn replace_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error>;

    /// Delete the StatefulSet, Service and ConfigMap named `name`
    async fn delete_app(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeAddonClient {
    client: Client,
}

impl KubeAddonClient {
    /// Create a new KubeAddonClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let api: Api<K> = self.api(&obj.namespace().unwrap_or_default());
        match api.create(&PostParams::default(), obj).await.map_err(Error::from) {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(kind = %K::kind(&()), name = %obj.name_any(), "Object already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = self.api(namespace);
        match api
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(Error::from)
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AddonClient for KubeAddonClient {
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        self.create(config_map).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        self.create(service).await
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error> {
        self.create(stateful_set).await
    }

    async fn replace_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error> {
        let api: Api<StatefulSet> = self.api(&stateful_set.namespace().unwrap_or_default());
        api.replace(&stateful_set.name_any(), &PostParams::default(), stateful_set)
            .await?;
        Ok(())
    }

    async fn delete_app(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<StatefulSet>(namespace, name).await?;
        self.delete::<Service>(namespace, name).await?;
        self.delete::<ConfigMap>(namespace, name).await
    }
}
