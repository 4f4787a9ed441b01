//! Release controller: turns a deployment's build trigger into a Release
//!
//! A deployment asks for a build by setting `kolihub.io/build: "true"`
//! together with its git metadata. The controller creates a Release named
//! after the deployment and switches the trigger back off.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use koli_common::crd::{HeadCommit, Release, ReleaseSpec};
use koli_common::events::{reasons, EventRecorder};
use koli_common::meta::{
    annotation, annotation_is_true, annotation_patch, annotations, labels, short_sha,
    NamespaceMetadata,
};
use koli_common::Error;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, trace, warn};

use crate::client::{ControlPlane, CreateOutcome};
use crate::controller::Controller;
use crate::informer::{HasSynced, Informer, ObjectCache, ResourceEvent};
use crate::queue::{SyncHandler, TaskQueue};

/// Name of the release controller's work queue
pub const QUEUE_NAME: &str = "release";
/// Component reported on events recorded by the release controller
pub const COMPONENT: &str = "apps-controller";

/// Annotations a deployment must carry before a build can be released
pub const REQUIRED_KEYS: &[&str] = &[annotations::GIT_REMOTE];

/// Creates Releases for deployments that request a build
pub struct ReleaseController {
    client: Arc<dyn ControlPlane>,
    deployments: Arc<dyn ObjectCache<Deployment>>,
    recorder: Arc<dyn EventRecorder>,
}

impl ReleaseController {
    /// Create a release controller reading deployments from `deployments`
    pub fn new(
        client: Arc<dyn ControlPlane>,
        deployments: Arc<dyn ObjectCache<Deployment>>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            client,
            deployments,
            recorder,
        }
    }
}

#[async_trait]
impl SyncHandler for ReleaseController {
    async fn sync(&self, key: &str) -> Result<(), Error> {
        let Some(deploy) = self.deployments.get_by_key(key)? else {
            debug!(key = %key, "Deployment doesn't exist");
            return Ok(());
        };

        if !NamespaceMetadata::is_valid(&deploy.namespace().unwrap_or_default()) {
            debug!(key = %key, "Not a platform namespace, skipping");
            return Ok(());
        }
        if !annotation_is_true(&deploy.metadata, annotations::BUILD) {
            trace!(key = %key, "Not a build action");
            return Ok(());
        }

        if let Err(e) = validate_required_keys(key, &deploy) {
            if let Error::MissingAnnotation { annotation, .. } = &e {
                self.recorder
                    .record(
                        &deploy.object_ref(&()),
                        EventType::Warning,
                        reasons::MISSING_ANNOTATION_KEY,
                        format!("Missing required key '{annotation}'"),
                    )
                    .await;
            }
            return Err(e);
        }

        let release = build_release(&deploy);
        match self.client.create_release(&release).await? {
            CreateOutcome::Created => {
                let spec = &release.spec;
                let revision = if spec.head_commit.id.is_empty() {
                    &spec.git_branch
                } else {
                    &spec.head_commit.id
                };
                self.recorder
                    .record(
                        &release.object_ref(&()),
                        EventType::Normal,
                        reasons::CREATED,
                        format!(
                            "Created release with revision '{revision}' from '{}'",
                            spec.source
                        ),
                    )
                    .await;
                info!(key = %key, release = %release.name_any(), "New release created");
            }
            CreateOutcome::AlreadyExists => {
                debug!(key = %key, release = %release.name_any(), "Release already exists");
            }
        }

        if let Err(e) = self
            .client
            .patch_deployment(
                &deploy.namespace().unwrap_or_default(),
                &deploy.name_any(),
                &annotation_patch(annotations::BUILD, false),
            )
            .await
        {
            warn!(key = %key, error = %e, "Failed deactivating build on deployment");
        }
        Ok(())
    }
}

/// Enqueue additions, and updates that changed both the resource version and
/// the generation. Status-only updates and deletions are ignored.
pub fn on_spec_change(event: &ResourceEvent<Deployment>) -> bool {
    match event {
        ResourceEvent::Added(_) => true,
        ResourceEvent::Updated { old, new } => {
            old.metadata.resource_version != new.metadata.resource_version
                && old.metadata.generation != new.metadata.generation
        }
        ResourceEvent::Deleted(_) => false,
    }
}

/// Build the release controller over the shared deployment informer
///
/// Workers also wait for the release informer so the cluster's releases are
/// known before new ones are created.
pub fn new_controller(
    deployments: &Arc<Informer<Deployment>>,
    releases: &Arc<Informer<Release>>,
    client: Arc<dyn ControlPlane>,
    recorder: Arc<dyn EventRecorder>,
) -> Controller<Deployment> {
    let controller = ReleaseController::new(client, deployments.clone(), recorder);
    let caches: Vec<Arc<dyn HasSynced>> = vec![releases.clone(), deployments.clone()];
    Controller::new(
        QUEUE_NAME,
        Arc::new(TaskQueue::new(QUEUE_NAME, Arc::new(controller))),
        deployments.subscribe(),
        on_spec_change,
        caches,
    )
}

/// Fail with the first required annotation `deploy` lacks
pub fn validate_required_keys(key: &str, deploy: &Deployment) -> Result<(), Error> {
    match REQUIRED_KEYS
        .iter()
        .find(|required| annotation(&deploy.metadata, required).is_none())
    {
        Some(missing) => Err(Error::missing_annotation(key, *missing)),
        None => Ok(()),
    }
}

/// Release for the build requested by `deploy`, named after the deployment
pub fn build_release(deploy: &Deployment) -> Release {
    let meta = &deploy.metadata;
    let value = |key: &str| annotation(meta, key).unwrap_or_default().to_string();
    let name = deploy.name_any();

    let mut release_labels = BTreeMap::from([(labels::DEPLOY.to_string(), name.clone())]);
    if let Some(sha) = annotation(meta, annotations::GIT_COMMIT_ID).and_then(short_sha) {
        release_labels.insert(labels::GIT_REVISION.to_string(), sha.to_string());
    }

    let mut release = Release::new(
        &name,
        ReleaseSpec {
            git_remote: value(annotations::GIT_REMOTE),
            git_branch: value(annotations::GIT_BRANCH),
            git_repository: value(annotations::GIT_REPOSITORY),
            head_commit: HeadCommit {
                id: value(annotations::GIT_COMMIT_ID),
                author: value(annotations::GIT_AUTHOR_NAME),
                avatar_url: value(annotations::GIT_AUTHOR_AVATAR),
                compare: value(annotations::GIT_COMPARE),
                message: value(annotations::GIT_COMMIT_MESSAGE),
                url: value(annotations::GIT_COMMIT_URL),
            },
            build_revision: None,
            auto_deploy: annotation_is_true(meta, annotations::AUTO_DEPLOY),
            deploy_name: name.clone(),
            build: true,
            source: value(annotations::BUILD_SOURCE),
        },
    );
    release.metadata = ObjectMeta {
        name: Some(name),
        namespace: deploy.namespace(),
        labels: Some(release_labels),
        ..Default::default()
    };
    release
}

/// Highest revision in `revisions`, or zero when there is none
pub fn last_build_revision(revisions: &[u32]) -> u32 {
    revisions.iter().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use kube::runtime::watcher::Event;

    use super::*;
    use crate::client::MockControlPlane;
    use crate::testing::{deployment, with_annotations, CapturingRecorder, FakeControlPlane};

    const NS: &str = "prod-coyote-acme";
    const SHA: &str = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";

    struct Harness {
        client: Arc<FakeControlPlane>,
        recorder: Arc<CapturingRecorder>,
        controller: ReleaseController,
    }

    fn harness(deploys: Vec<Deployment>) -> Harness {
        let informer = Arc::new(Informer::new());
        informer.apply(Event::Init);
        for deploy in deploys {
            informer.apply(Event::InitApply(deploy));
        }
        informer.apply(Event::InitDone);

        let client = Arc::new(FakeControlPlane::default());
        let recorder = Arc::new(CapturingRecorder::default());
        let controller = ReleaseController::new(client.clone(), informer, recorder.clone());
        Harness {
            client,
            recorder,
            controller,
        }
    }

    fn build_requested(name: &str) -> Deployment {
        with_annotations(
            deployment(NS, name, "1"),
            &[
                (annotations::BUILD, "true"),
                (annotations::GIT_REMOTE, "https://github.com/coyote/web.git"),
                (annotations::GIT_BRANCH, "master"),
                (annotations::GIT_REPOSITORY, "coyote/web"),
                (annotations::GIT_COMMIT_ID, SHA),
                (annotations::GIT_AUTHOR_NAME, "wile"),
                (annotations::GIT_COMMIT_MESSAGE, "fix rocket skates"),
                (annotations::BUILD_SOURCE, "github"),
                (annotations::AUTO_DEPLOY, "true"),
            ],
        )
    }

    #[tokio::test]
    async fn story_build_trigger_creates_one_release_and_clears_trigger() {
        let h = harness(vec![build_requested("web")]);

        h.controller.sync("prod-coyote-acme/web").await.expect("sync");

        let releases = h.client.releases.lock().clone();
        assert_eq!(releases.len(), 1);
        let release = &releases[0];
        assert_eq!(release.name_any(), "web");
        assert_eq!(release.namespace().as_deref(), Some(NS));
        assert_eq!(release.labels().get(labels::DEPLOY).map(String::as_str), Some("web"));
        assert_eq!(
            release.labels().get(labels::GIT_REVISION).map(String::as_str),
            Some("a94a8fe")
        );
        assert!(release.spec.build);
        assert!(release.spec.auto_deploy);
        assert_eq!(release.spec.git_remote, "https://github.com/coyote/web.git");
        assert_eq!(release.spec.head_commit.id, SHA);
        assert_eq!(release.spec.head_commit.author, "wile");
        assert_eq!(release.spec.deploy_name, "web");

        let patches = h.client.patches.lock().clone();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].2, annotation_patch(annotations::BUILD, false));

        let events = h.recorder.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, reasons::CREATED);
        assert!(!events[0].warning);
        assert_eq!(
            events[0].note,
            format!("Created release with revision '{SHA}' from 'github'")
        );
        assert_eq!(events[0].regarding.kind.as_deref(), Some("Release"));
    }

    #[tokio::test]
    async fn cleared_trigger_creates_no_release() {
        let deploy = with_annotations(build_requested("web"), &[(annotations::BUILD, "false")]);
        let h = harness(vec![deploy]);

        h.controller.sync("prod-coyote-acme/web").await.expect("no-op");
        assert!(h.client.releases.lock().is_empty());
        assert!(h.client.patches.lock().is_empty());
    }

    #[tokio::test]
    async fn duplicate_trigger_collides_and_still_clears_marker() {
        let h = harness(vec![build_requested("web")]);
        h.controller.sync("prod-coyote-acme/web").await.expect("first");
        h.controller.sync("prod-coyote-acme/web").await.expect("second");

        assert_eq!(h.client.releases.lock().len(), 1);
        assert_eq!(h.client.patches.lock().len(), 2);
        assert_eq!(h.recorder.events.lock().len(), 1, "only the creation is announced");
    }

    #[tokio::test]
    async fn story_missing_remote_records_event_and_fails() {
        let deploy = with_annotations(deployment(NS, "web", "1"), &[(annotations::BUILD, "true")]);
        let h = harness(vec![deploy]);

        let err = h.controller.sync("prod-coyote-acme/web").await.expect_err("missing remote");
        assert!(matches!(
            err,
            Error::MissingAnnotation { ref annotation, .. } if annotation == annotations::GIT_REMOTE
        ));
        assert!(h.client.releases.lock().is_empty());

        let events = h.recorder.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert!(events[0].warning);
        assert_eq!(events[0].reason, reasons::MISSING_ANNOTATION_KEY);
        assert_eq!(events[0].note, "Missing required key 'kolihub.io/gitremote'");
    }

    #[tokio::test]
    async fn patch_failure_is_not_a_sync_failure() {
        let h = harness(vec![build_requested("web")]);
        h.client.fail_patches.store(true, Ordering::SeqCst);
        h.controller.sync("prod-coyote-acme/web").await.expect("sync");
        assert_eq!(h.client.releases.lock().len(), 1);
    }

    #[tokio::test]
    async fn create_failure_keeps_trigger_for_retry() {
        let h = harness(vec![build_requested("web")]);
        h.client.fail_releases.store(true, Ordering::SeqCst);
        assert!(h.controller.sync("prod-coyote-acme/web").await.is_err());
        assert!(h.client.patches.lock().is_empty());
    }

    #[tokio::test]
    async fn absent_and_foreign_deployments_are_ignored() {
        let foreign = with_annotations(
            deployment("default", "web", "1"),
            &[(annotations::BUILD, "true")],
        );
        let h = harness(vec![foreign]);
        h.controller.sync("default/web").await.expect("foreign");
        h.controller.sync("prod-coyote-acme/gone").await.expect("absent");
        assert!(h.recorder.events.lock().is_empty());
        assert!(h.client.releases.lock().is_empty());
    }

    #[tokio::test]
    async fn story_release_without_commit_is_announced_by_branch() {
        let mut deploy = build_requested("web");
        deploy.annotations_mut().remove(annotations::GIT_COMMIT_ID);
        let h = harness(vec![deploy]);

        h.controller.sync("prod-coyote-acme/web").await.expect("sync");

        let releases = h.client.releases.lock().clone();
        assert_eq!(releases.len(), 1);
        assert!(releases[0].spec.head_commit.id.is_empty());
        assert!(releases[0].labels().get(labels::GIT_REVISION).is_none());

        let events = h.recorder.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].note,
            "Created release with revision 'master' from 'github'"
        );
    }

    #[tokio::test]
    async fn existing_release_is_not_announced_but_trigger_is_cleared() {
        let mut client = MockControlPlane::new();
        client
            .expect_create_release()
            .withf(|release| release.name_any() == "web")
            .times(1)
            .returning(|_| Ok(CreateOutcome::AlreadyExists));
        client
            .expect_patch_deployment()
            .withf(|ns, name, patch| {
                ns == NS && name == "web" && *patch == annotation_patch(annotations::BUILD, false)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let informer = Arc::new(Informer::new());
        informer.apply(Event::Init);
        informer.apply(Event::InitApply(build_requested("web")));
        informer.apply(Event::InitDone);
        let recorder = Arc::new(CapturingRecorder::default());
        let controller = ReleaseController::new(Arc::new(client), informer, recorder.clone());

        controller.sync("prod-coyote-acme/web").await.expect("sync");
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn short_commit_gets_no_revision_label_and_auto_deploy_defaults_off() {
        let deploy = with_annotations(
            deployment(NS, "web", "1"),
            &[(annotations::GIT_REMOTE, "r"), (annotations::GIT_COMMIT_ID, "abc")],
        );
        let release = build_release(&deploy);
        assert!(release.labels().get(labels::GIT_REVISION).is_none());
        assert!(!release.spec.auto_deploy);
        assert_eq!(release.spec.build_revision, None);
    }

    #[test]
    fn update_filter_needs_new_version_and_generation() {
        let base = deployment(NS, "web", "1");
        let mut status_only = deployment(NS, "web", "2");
        status_only.metadata.generation = base.metadata.generation;
        let mut spec_change = deployment(NS, "web", "3");
        spec_change.metadata.generation = Some(2);

        let update = |new: Deployment| ResourceEvent::Updated {
            old: Arc::new(base.clone()),
            new: Arc::new(new),
        };
        assert!(!on_spec_change(&update(base.clone())));
        assert!(!on_spec_change(&update(status_only)));
        assert!(on_spec_change(&update(spec_change)));
        assert!(on_spec_change(&ResourceEvent::Added(Arc::new(base.clone()))));
        assert!(!on_spec_change(&ResourceEvent::Deleted(Arc::new(base))));
    }

    #[test]
    fn last_build_revision_is_the_maximum() {
        assert_eq!(last_build_revision(&[]), 0);
        assert_eq!(last_build_revision(&[3, 9, 4]), 9);
    }
}
