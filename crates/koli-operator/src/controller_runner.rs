//! Controller runner - builds informer and controller futures
//!
//! Every `build_*` function returns boxed futures so `main` decides how they
//! are composed. All futures stop when the shared token is cancelled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use koli_common::crd::{Plan, Release};
use koli_common::events::{EventRecorder, KubeEventRecorder};
use koli_controller::informer::CachedObject;
use koli_controller::{app_manager, release, ControlPlane, Informer, KubeControlPlane};

use crate::config::OperatorConfig;

/// A unit of work the operator runs until shutdown
pub type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Caches shared by the controllers
pub struct Informers {
    /// Every Deployment in the cluster
    pub deployments: Arc<Informer<Deployment>>,
    /// Storage and hardware plans
    pub plans: Arc<Informer<Plan>>,
    /// Build releases
    pub releases: Arc<Informer<Release>>,
}

impl Informers {
    /// Empty, unsynced caches
    pub fn new() -> Self {
        Self {
            deployments: Arc::new(Informer::new()),
            plans: Arc::new(Informer::new()),
            releases: Arc::new(Informer::new()),
        }
    }

    /// Futures watching the cluster and feeding each cache
    pub fn build_watchers(&self, client: &Client, shutdown: &CancellationToken) -> Vec<Task> {
        vec![
            watch(self.deployments.clone(), Api::all(client.clone()), shutdown.clone()),
            watch(self.plans.clone(), Api::all(client.clone()), shutdown.clone()),
            watch(self.releases.clone(), Api::all(client.clone()), shutdown.clone()),
        ]
    }
}

impl Default for Informers {
    fn default() -> Self {
        Self::new()
    }
}

fn watch<K: CachedObject>(informer: Arc<Informer<K>>, api: Api<K>, shutdown: CancellationToken) -> Task {
    Box::pin(async move { informer.run(api, shutdown).await })
}

/// Build the app manager and release controller futures
pub fn build_controllers(
    client: &Client,
    informers: &Informers,
    config: &OperatorConfig,
    shutdown: &CancellationToken,
) -> Vec<Task> {
    let control_plane: Arc<dyn ControlPlane> = Arc::new(KubeControlPlane::new(client.clone()));
    let app_recorder: Arc<dyn EventRecorder> =
        Arc::new(KubeEventRecorder::new(client.clone(), app_manager::COMPONENT));
    let release_recorder: Arc<dyn EventRecorder> =
        Arc::new(KubeEventRecorder::new(client.clone(), release::COMPONENT));

    build_controllers_with(
        informers,
        control_plane,
        app_recorder,
        release_recorder,
        config,
        shutdown,
    )
}

/// Build the controller futures over the given collaborators
pub fn build_controllers_with(
    informers: &Informers,
    control_plane: Arc<dyn ControlPlane>,
    app_recorder: Arc<dyn EventRecorder>,
    release_recorder: Arc<dyn EventRecorder>,
    config: &OperatorConfig,
    shutdown: &CancellationToken,
) -> Vec<Task> {
    let app_manager = app_manager::new_controller(
        &informers.deployments,
        &informers.plans,
        control_plane.clone(),
        app_recorder,
        config.default_domain.clone(),
    );
    let releases = release::new_controller(
        &informers.deployments,
        &informers.releases,
        control_plane,
        release_recorder,
    );

    tracing::info!(workers = config.workers, "- App manager controller");
    tracing::info!(workers = config.workers, "- Release controller");

    vec![
        Box::pin(app_manager.run(config.workers, shutdown.clone())),
        Box::pin(releases.run(config.workers, shutdown.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use koli_common::events::NoopEventRecorder;
    use koli_controller::CreateOutcome;

    struct NoopControlPlane;

    #[async_trait::async_trait]
    impl ControlPlane for NoopControlPlane {
        async fn create_service(
            &self,
            _: &k8s_openapi::api::core::v1::Service,
        ) -> Result<CreateOutcome, koli_common::Error> {
            Ok(CreateOutcome::Created)
        }
        async fn create_ingress(
            &self,
            _: &k8s_openapi::api::networking::v1::Ingress,
        ) -> Result<CreateOutcome, koli_common::Error> {
            Ok(CreateOutcome::Created)
        }
        async fn create_claim(
            &self,
            _: &k8s_openapi::api::core::v1::PersistentVolumeClaim,
        ) -> Result<CreateOutcome, koli_common::Error> {
            Ok(CreateOutcome::Created)
        }
        async fn create_release(&self, _: &Release) -> Result<CreateOutcome, koli_common::Error> {
            Ok(CreateOutcome::Created)
        }
        async fn patch_deployment(
            &self,
            _: &str,
            _: &str,
            _: &serde_json::Value,
        ) -> Result<(), koli_common::Error> {
            Ok(())
        }
        async fn delete_pods(&self, _: &str, _: &str) -> Result<(), koli_common::Error> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn story_unsynced_controllers_stop_on_shutdown() {
        let informers = Informers::new();
        let config = OperatorConfig {
            kubeconfig: None,
            default_domain: None,
            workers: 2,
        };
        let shutdown = CancellationToken::new();
        let tasks = build_controllers_with(
            &informers,
            Arc::new(NoopControlPlane),
            Arc::new(NoopEventRecorder),
            Arc::new(NoopEventRecorder),
            &config,
            &shutdown,
        );
        assert_eq!(tasks.len(), 2);

        let running = tokio::spawn(futures::future::join_all(tasks));
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!running.is_finished(), "controllers wait for cache sync");

        shutdown.cancel();
        running.await.expect("controllers exit cleanly");
    }
}
