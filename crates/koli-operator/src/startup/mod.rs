//! Startup steps run before the controllers

pub mod crds;
pub mod signal;

pub use crds::{all_crds, crd_manifests, ensure_crds_established};
pub use signal::shutdown_on_signal;
