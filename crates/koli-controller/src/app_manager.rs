//! App manager: default routes, storage claims and build cleanup for apps
//!
//! For every platform deployment the app manager makes sure that:
//! - a default Service and Ingress exist when a default domain is configured
//! - the persistent volume claim of its storage plan exists, once requested
//! - slug build pods are removed after the deployment is gone

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Service, ServicePort, ServiceSpec,
    VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use koli_common::crd::Plan;
use koli_common::events::{reasons, EventRecorder};
use koli_common::kube_utils::split_key;
use koli_common::meta::{
    annotation_is_true, annotation_patch, annotations, label, labels, NamespaceMetadata,
};
use koli_common::{metrics, Error, SYSTEM_NAMESPACE};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, trace, warn};

use crate::client::{ControlPlane, CreateOutcome};
use crate::controller::{on_resource_version_change, Controller};
use crate::informer::{HasSynced, Informer, ObjectCache};
use crate::queue::{SyncHandler, TaskQueue};

/// Name of the app manager's work queue
pub const QUEUE_NAME: &str = "app_manager";
/// Component reported on events recorded by the app manager
pub const COMPONENT: &str = "app-manager-controller";

const SERVICE_PORT: i32 = 80;
const CONTAINER_PORT: i32 = 5000;

/// Reconciles platform deployments
pub struct AppManager {
    client: Arc<dyn ControlPlane>,
    deployments: Arc<dyn ObjectCache<Deployment>>,
    plans: Arc<dyn ObjectCache<Plan>>,
    recorder: Arc<dyn EventRecorder>,
    default_domain: Option<String>,
}

impl AppManager {
    /// Create an app manager. An empty `default_domain` disables default routes.
    pub fn new(
        client: Arc<dyn ControlPlane>,
        deployments: Arc<dyn ObjectCache<Deployment>>,
        plans: Arc<dyn ObjectCache<Plan>>,
        recorder: Arc<dyn EventRecorder>,
        default_domain: Option<String>,
    ) -> Self {
        Self {
            client,
            deployments,
            plans,
            recorder,
            default_domain: default_domain.filter(|d| !d.is_empty()),
        }
    }

    async fn clean_orphan_builds(&self, key: &str) {
        let Ok((Some(namespace), name)) = split_key(key) else {
            return;
        };
        if !NamespaceMetadata::is_valid(namespace) {
            return;
        }
        info!(key = %key, "Removing orphan slug builds");
        let selector = format!("{}={}", labels::APP, name);
        if let Err(e) = self.client.delete_pods(namespace, &selector).await {
            warn!(key = %key, error = %e, "Failed removing orphan slug builds");
        }
    }

    async fn ensure_default_route(&self, deploy: &Deployment, domain: &str) -> Result<(), Error> {
        if label(&deploy.metadata, labels::TYPE) != Some(labels::TYPE_APP) {
            return Ok(());
        }
        let service = self.client.create_service(&default_service(deploy)).await?;
        let ingress = self
            .client
            .create_ingress(&default_ingress(deploy, domain))
            .await?;
        if service == CreateOutcome::Created || ingress == CreateOutcome::Created {
            info!(
                namespace = %deploy.namespace().unwrap_or_default(),
                name = %deploy.name_any(),
                host = %route_host(deploy, domain),
                "Default route created"
            );
        }
        Ok(())
    }

    async fn provision_storage(
        &self,
        key: &str,
        deploy: &Deployment,
        plan_name: &str,
    ) -> Result<(), Error> {
        let plan = self
            .plans
            .list()
            .into_iter()
            .find(|p| p.name_any() == plan_name && p.is_storage_type());
        let Some(plan) = plan else {
            self.recorder
                .record(
                    &deploy.object_ref(&()),
                    EventType::Warning,
                    reasons::PLAN_NOT_FOUND,
                    format!("Storage Plan \"{plan_name}\" not found"),
                )
                .await;
            return Err(Error::plan_not_found(key, plan_name));
        };

        let Some(claim) = storage_claim(deploy, &plan) else {
            let note = format!("Storage Plan \"{plan_name}\" declares no capacity");
            self.recorder
                .record(
                    &deploy.object_ref(&()),
                    EventType::Warning,
                    reasons::PROVISION_ERROR,
                    note.clone(),
                )
                .await;
            return Err(Error::internal("app-manager", format!("{key}: {note}")));
        };

        match self.client.create_claim(&claim).await {
            Ok(CreateOutcome::Created) => {
                metrics::PVC_CREATED.add(1, &[]);
                info!(
                    key = %key,
                    claim = %claim.name_any(),
                    storage = plan.spec.storage.as_deref().unwrap_or_default(),
                    "Storage claim created"
                );
            }
            Ok(CreateOutcome::AlreadyExists) => {
                trace!(key = %key, claim = %claim.name_any(), "Storage claim already exists");
            }
            Err(e) => {
                metrics::PVC_FAILED.add(1, &[]);
                self.recorder
                    .record(
                        &deploy.object_ref(&()),
                        EventType::Warning,
                        reasons::PROVISION_ERROR,
                        format!("Failed creating PVC [{e}]"),
                    )
                    .await;
                return Err(e);
            }
        }

        let namespace = deploy.namespace().unwrap_or_default();
        self.client
            .patch_deployment(
                &namespace,
                &deploy.name_any(),
                &annotation_patch(annotations::SETUP_STORAGE, false),
            )
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Failed clearing setup-storage marker"))
    }
}

#[async_trait]
impl SyncHandler for AppManager {
    async fn sync(&self, key: &str) -> Result<(), Error> {
        let Some(deploy) = self.deployments.get_by_key(key)? else {
            debug!(key = %key, "Deployment doesn't exist");
            self.clean_orphan_builds(key).await;
            return Ok(());
        };

        if deploy.metadata.deletion_timestamp.is_some() {
            debug!(key = %key, "Deployment marked for deletion");
            return Ok(());
        }
        if !NamespaceMetadata::is_valid(&deploy.namespace().unwrap_or_default()) {
            debug!(key = %key, "Not a platform namespace, skipping");
            return Ok(());
        }

        if let Some(domain) = self.default_domain.as_deref() {
            if let Err(e) = self.ensure_default_route(&deploy, domain).await {
                warn!(key = %key, error = %e, "Failed adding default route");
            }
        }

        if lacks_resource_bounds(&deploy) {
            warn!(key = %key, "Deployment has empty 'limits' or 'requests' resources");
        }

        let plan_name = label(&deploy.metadata, labels::STORAGE_PLAN);
        match plan_name {
            Some(plan_name) if annotation_is_true(&deploy.metadata, annotations::SETUP_STORAGE) => {
                self.provision_storage(key, &deploy, plan_name).await
            }
            _ => {
                trace!(key = %key, "No storage plan or setup-storage marker");
                Ok(())
            }
        }
    }
}

/// Build the app manager controller over shared deployment and plan informers
pub fn new_controller(
    deployments: &Arc<Informer<Deployment>>,
    plans: &Arc<Informer<Plan>>,
    client: Arc<dyn ControlPlane>,
    recorder: Arc<dyn EventRecorder>,
    default_domain: Option<String>,
) -> Controller<Deployment> {
    let manager = AppManager::new(
        client,
        deployments.clone(),
        plans.clone(),
        recorder,
        default_domain,
    );
    let caches: Vec<Arc<dyn HasSynced>> = vec![deployments.clone(), plans.clone()];
    Controller::new(
        QUEUE_NAME,
        Arc::new(TaskQueue::new(QUEUE_NAME, Arc::new(manager))),
        deployments.subscribe(),
        on_resource_version_change,
        caches,
    )
}

/// Enqueue every cached deployment of `namespace`
///
/// A library hook: the operator binary does not call it. Code reacting to a
/// namespace-wide change (a plan edit, a quota update) uses it to re-sync
/// every app of that namespace through the controller's queue.
pub fn enqueue_for_namespace(
    tasks: &TaskQueue,
    deployments: &dyn ObjectCache<Deployment>,
    namespace: &str,
) {
    for deploy in deployments.list() {
        if deploy.namespace().as_deref() == Some(namespace) {
            tasks.enqueue(deploy.as_ref());
        }
    }
}

fn owned_meta(deploy: &Deployment) -> ObjectMeta {
    ObjectMeta {
        name: Some(deploy.name_any()),
        namespace: deploy.namespace(),
        labels: Some(BTreeMap::from([(
            labels::TYPE.to_string(),
            labels::TYPE_APP.to_string(),
        )])),
        owner_references: deploy.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

fn route_host(deploy: &Deployment, domain: &str) -> String {
    format!(
        "{}-{}.{}",
        deploy.name_any(),
        deploy.namespace().unwrap_or_default(),
        domain
    )
}

/// Service exposing the app's web port, owned by the deployment
pub fn default_service(deploy: &Deployment) -> Service {
    Service {
        metadata: owned_meta(deploy),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([
                (labels::NAME.to_string(), deploy.name_any()),
                (labels::TYPE.to_string(), labels::TYPE_APP.to_string()),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress routing `<name>-<namespace>.<domain>` to the default service
pub fn default_ingress(deploy: &Deployment, domain: &str) -> Ingress {
    let mut metadata = owned_meta(deploy);
    // The ingress controller claims subdomains from the system namespace.
    metadata.annotations = Some(BTreeMap::from([(
        annotations::PARENT.to_string(),
        SYSTEM_NAMESPACE.to_string(),
    )]));

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(route_host(deploy, domain)),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: deploy.name_any(),
                                port: Some(ServiceBackendPort {
                                    number: Some(SERVICE_PORT),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Claim `d-<name>` sized by the plan; `None` when the plan has no capacity
pub fn storage_claim(deploy: &Deployment, plan: &Plan) -> Option<PersistentVolumeClaim> {
    let storage = plan.spec.storage.as_deref().filter(|s| !s.is_empty())?;
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(format!("d-{}", deploy.name_any())),
            namespace: deploy.namespace(),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn lacks_resource_bounds(deploy: &Deployment) -> bool {
    let first = deploy
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first());
    match first {
        Some(container) => container
            .resources
            .as_ref()
            .map_or(true, |r| r.requests.is_none() || r.limits.is_none()),
        None => false,
    }
}
