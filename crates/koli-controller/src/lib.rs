//! Reconciliation machinery for the Koli platform
//!
//! - [`queue`]: deduplicating, rate-limited work queue and supervised workers
//! - [`informer`]: watched caches with change notifications and a sync barrier
//! - [`controller`]: the event filter → queue → worker loop shared by controllers
//! - [`app_manager`] and [`release`]: the concrete reconcilers
//! - [`crd_provisioner`]: create custom resource types and wait until usable

#![deny(missing_docs)]

pub mod app_manager;
pub mod client;
pub mod controller;
pub mod crd_provisioner;
pub mod informer;
pub mod queue;
pub mod release;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ControlPlane, CreateOutcome, KubeControlPlane};
pub use controller::Controller;
pub use informer::{Informer, ObjectCache, ResourceEvent};
