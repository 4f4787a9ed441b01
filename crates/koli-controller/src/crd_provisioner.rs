//! Custom resource type provisioning
//!
//! Each declared type is created (a collision counts as success) and then
//! polled until the API server reports it `Established`. A `NamesAccepted`
//! condition of `False` ends polling at once with a name conflict error.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionCondition,
};
use koli_common::crd::{Plan, Release};
use koli_common::kube_utils::poll_until;
use koli_common::Error;
use kube::api::{Api, PostParams};
use kube::{Client, CustomResourceExt, Resource};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::client::CreateOutcome;

/// Interval between readiness checks
pub const CRD_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Budget for a type to become established
pub const CRD_READY_TIMEOUT: Duration = Duration::from_secs(30);

const ESTABLISHED: &str = "Established";
const NAMES_ACCEPTED: &str = "NamesAccepted";

/// Operations the provisioner needs on custom resource definitions
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CrdClient: Send + Sync {
    /// Create a definition; a collision is [`CreateOutcome::AlreadyExists`]
    async fn create(&self, crd: &CustomResourceDefinition) -> Result<CreateOutcome, Error>;

    /// Current status conditions of the definition called `name`
    async fn conditions(
        &self,
        name: &str,
    ) -> Result<Vec<CustomResourceDefinitionCondition>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeCrdClient {
    client: Client,
}

impl KubeCrdClient {
    /// Create a new KubeCrdClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrdClient for KubeCrdClient {
    async fn create(&self, crd: &CustomResourceDefinition) -> Result<CreateOutcome, Error> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        match api.create(&PostParams::default(), crd).await.map_err(Error::from) {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if e.is_already_exists() => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn conditions(
        &self,
        name: &str,
    ) -> Result<Vec<CustomResourceDefinitionCondition>, Error> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = api.get(name).await?;
        Ok(crd
            .status
            .and_then(|status| status.conditions)
            .unwrap_or_default())
    }
}

/// A custom resource type this controller depends on
#[derive(Clone, Debug)]
pub struct ResourceDeclaration {
    /// Definition name, `<plural>.<group>`
    pub name: String,
    /// Kind, e.g. `Plan`
    pub kind: String,
    /// Plural resource name
    pub plural: String,
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// The full definition submitted to the API server
    pub definition: CustomResourceDefinition,
}

impl ResourceDeclaration {
    /// Declaration of a derived custom resource
    pub fn of<K>() -> Self
    where
        K: CustomResourceExt + Resource<DynamicType = ()>,
    {
        Self {
            name: K::crd_name().to_string(),
            kind: K::kind(&()).into_owned(),
            plural: K::plural(&()).into_owned(),
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            definition: K::crd(),
        }
    }
}

/// The platform types the controllers watch: plans and releases
pub fn platform_resources() -> Vec<ResourceDeclaration> {
    vec![
        ResourceDeclaration::of::<Plan>(),
        ResourceDeclaration::of::<Release>(),
    ]
}

/// Readiness derived from a condition list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// `Established=True` was observed
    Established,
    /// `NamesAccepted=False` was observed; carries the reported reason
    NameConflict(String),
    /// Neither outcome yet
    Pending,
}

/// Classify a condition list, scanning conditions in order
pub fn readiness(conditions: &[CustomResourceDefinitionCondition]) -> Readiness {
    for condition in conditions {
        match (condition.type_.as_str(), condition.status.as_str()) {
            (ESTABLISHED, "True") => return Readiness::Established,
            (NAMES_ACCEPTED, "False") => {
                return Readiness::NameConflict(condition.reason.clone().unwrap_or_default())
            }
            _ => {}
        }
    }
    Readiness::Pending
}

/// Declares custom resource types and waits for them to be usable
pub struct CrdProvisioner<C> {
    client: C,
    poll_interval: Duration,
    timeout: Duration,
}

impl<C: CrdClient> CrdProvisioner<C> {
    /// Provisioner polling every second for up to thirty seconds
    pub fn new(client: C) -> Self {
        Self::with_timing(client, CRD_POLL_INTERVAL, CRD_READY_TIMEOUT)
    }

    /// Provisioner with custom polling interval and timeout
    pub fn with_timing(client: C, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            poll_interval,
            timeout,
        }
    }

    /// Create every declared type in order and wait for each to be established
    ///
    /// Stops at the first failure.
    pub async fn provision(&self, declarations: &[ResourceDeclaration]) -> Result<(), Error> {
        for declaration in declarations {
            let outcome = self.client.create(&declaration.definition).await?;
            info!(
                crd = %declaration.name,
                kind = %declaration.kind,
                ?outcome,
                "Custom resource definition provisioned, waiting to be ready"
            );
            self.wait_established(&declaration.name).await?;
            info!(crd = %declaration.name, "Custom resource definition established");
        }
        Ok(())
    }

    /// Poll the conditions of `name` until it is established
    pub async fn wait_established(&self, name: &str) -> Result<(), Error> {
        let timeout = self.timeout;
        poll_until(
            timeout,
            self.poll_interval,
            || Error::CrdTimeout {
                name: name.to_string(),
                timeout,
            },
            move || async move {
                let conditions = self.client.conditions(name).await?;
                match readiness(&conditions) {
                    Readiness::Established => Ok(true),
                    Readiness::NameConflict(reason) => Err(Error::CrdNameConflict {
                        name: name.to_string(),
                        reason,
                    }),
                    Readiness::Pending => {
                        debug!(crd = %name, "Custom resource definition not established yet");
                        Ok(false)
                    }
                }
            },
        )
        .await
    }
}
