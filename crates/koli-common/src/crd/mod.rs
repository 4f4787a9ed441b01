//! Custom Resource Definitions for the Koli platform
//!
//! - [`Plan`]: named resource/storage policy referenced by deployments
//! - [`Release`]: one build/deploy intent created by the release controller

mod plan;
mod release;

pub use plan::{Plan, PlanSpec, PlanType};
pub use release::{HeadCommit, Release, ReleaseSpec};

/// API group of every Koli custom resource
pub const GROUP: &str = "platform.koli.io";

/// API version of every Koli custom resource
pub const VERSION: &str = "v1alpha1";
