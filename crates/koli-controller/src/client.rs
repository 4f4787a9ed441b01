//! Control-plane operations issued by the reconcilers
//!
//! Every create is idempotent from the caller's point of view: a collision
//! with an existing object is reported as [`CreateOutcome::AlreadyExists`]
//! instead of an error.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use koli_common::crd::Release;
use koli_common::{Error, FIELD_MANAGER};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Result of an idempotent create
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// An object with the same name already existed
    AlreadyExists,
}

/// Trait abstracting the control-plane writes of the reconcilers
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create a Service in its own namespace
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error>;

    /// Create an Ingress in its own namespace
    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome, Error>;

    /// Create a PersistentVolumeClaim in its own namespace
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<CreateOutcome, Error>;

    /// Create a Release in its own namespace
    async fn create_release(&self, release: &Release) -> Result<CreateOutcome, Error>;

    /// Apply a JSON merge patch to a Deployment
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete every Pod in `namespace` matching `label_selector`
    async fn delete_pods(&self, namespace: &str, label_selector: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Create a new KubeControlPlane wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn create<K>(&self, obj: &K) -> Result<CreateOutcome, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), obj).await.map_err(Error::from) {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if e.is_already_exists() => {
                debug!(
                    kind = %K::kind(&()),
                    namespace = %namespace,
                    name = %obj.name_any(),
                    "Object already exists"
                );
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
        self.create(service).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome, Error> {
        self.create(ingress).await
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<CreateOutcome, Error> {
        self.create(claim).await
    }

    async fn create_release(&self, release: &Release) -> Result<CreateOutcome, Error> {
        self.create(release).await
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch(name, &params, &Patch::Merge(patch)).await?;
        Ok(())
    }

    async fn delete_pods(&self, namespace: &str, label_selector: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(label_selector),
        )
        .await?;
        Ok(())
    }
}
