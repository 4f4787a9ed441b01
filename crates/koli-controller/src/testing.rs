//! Test fixtures and in-memory fakes shared by the controller tests

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ObjectReference, PersistentVolumeClaim, PodSpec, PodTemplateSpec, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use koli_common::crd::{Plan, PlanSpec, PlanType, Release};
use koli_common::events::EventRecorder;
use koli_common::Error;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use parking_lot::Mutex;

use crate::client::{ControlPlane, CreateOutcome};

pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} injected"),
        reason: reason.to_string(),
        code,
    }))
}

pub(crate) fn deployment(namespace: &str, name: &str, resource_version: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            resource_version: Some(resource_version.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn with_annotations(mut deploy: Deployment, pairs: &[(&str, &str)]) -> Deployment {
    let annotations = deploy.annotations_mut();
    for (k, v) in pairs {
        annotations.insert(k.to_string(), v.to_string());
    }
    deploy
}

pub(crate) fn with_labels(mut deploy: Deployment, pairs: &[(&str, &str)]) -> Deployment {
    let labels = deploy.labels_mut();
    for (k, v) in pairs {
        labels.insert(k.to_string(), v.to_string());
    }
    deploy
}

pub(crate) fn plan(name: &str, plan_type: PlanType, storage: Option<&str>) -> Plan {
    let mut plan = Plan::new(
        name,
        PlanSpec {
            plan_type: Some(plan_type),
            storage: storage.map(str::to_string),
        },
    );
    plan.metadata.namespace = Some(koli_common::SYSTEM_NAMESPACE.to_string());
    plan.metadata.resource_version = Some("1".to_string());
    plan
}

/// In-memory control plane recording every call
#[derive(Default)]
pub(crate) struct FakeControlPlane {
    pub services: Mutex<Vec<Service>>,
    pub ingresses: Mutex<Vec<Ingress>>,
    pub claims: Mutex<Vec<PersistentVolumeClaim>>,
    pub releases: Mutex<Vec<Release>>,
    pub patches: Mutex<Vec<(String, String, serde_json::Value)>>,
    pub pod_deletions: Mutex<Vec<(String, String)>>,
    pub fail_claims: AtomicBool,
    pub fail_services: AtomicBool,
    pub fail_releases: AtomicBool,
    pub fail_patches: AtomicBool,
    pub fail_pod_deletions: AtomicBool,
}

impl FakeControlPlane {
    fn store<K: kube::Resource + Clone>(
        objects: &Mutex<Vec<K>>,
        obj: &K,
        fail: &AtomicBool,
    ) -> Result<CreateOutcome, Error> {
        if fail.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }
        let mut objects = objects.lock();
        let exists = objects
            .iter()
            .any(|o| o.name_any() == obj.name_any() && o.namespace() == obj.namespace());
        if exists {
            return Ok(CreateOutcome::AlreadyExists);
        }
        objects.push(obj.clone());
        Ok(CreateOutcome::Created)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
        Self::store(&self.services, service, &self.fail_services)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome, Error> {
        Self::store(&self.ingresses, ingress, &AtomicBool::new(false))
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<CreateOutcome, Error> {
        Self::store(&self.claims, claim, &self.fail_claims)
    }

    async fn create_release(&self, release: &Release) -> Result<CreateOutcome, Error> {
        Self::store(&self.releases, release, &self.fail_releases)
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        if self.fail_patches.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }
        self.patches
            .lock()
            .push((namespace.to_string(), name.to_string(), patch.clone()));
        Ok(())
    }

    async fn delete_pods(&self, namespace: &str, label_selector: &str) -> Result<(), Error> {
        self.pod_deletions
            .lock()
            .push((namespace.to_string(), label_selector.to_string()));
        if self.fail_pod_deletions.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }
        Ok(())
    }
}

/// An event captured by [`CapturingRecorder`]
#[derive(Clone, Debug)]
pub(crate) struct RecordedEvent {
    pub regarding: ObjectReference,
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

/// Recorder keeping every event in memory
#[derive(Default)]
pub(crate) struct CapturingRecorder {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl CapturingRecorder {
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventRecorder for CapturingRecorder {
    async fn record(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        self.events.lock().push(RecordedEvent {
            regarding: regarding.clone(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}
