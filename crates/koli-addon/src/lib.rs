//! Add-on catalog for the Koli platform
//!
//! An [`Addon`] declares a stateful backing service. Its `type` resolves to
//! one variant of the closed [`AddonKind`] set; implemented kinds become an
//! [`AddonApp`] exposing the [`AddonCapability`] operations, the rest fail
//! at lookup with an unsupported add-on error.

#![deny(missing_docs)]

pub mod app;
pub mod client;
pub mod crd;
pub mod kind;
pub mod memcached;
pub mod redis;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{AddonApp, AddonCapability};
pub use client::{AddonClient, KubeAddonClient};
pub use crd::{Addon, AddonEnvVar, AddonSpec};
pub use kind::AddonKind;
