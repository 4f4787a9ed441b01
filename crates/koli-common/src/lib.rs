//! Common types for the Koli platform controllers: CRDs, errors, events and
//! platform metadata conventions.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod meta;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for Koli system resources
pub const SYSTEM_NAMESPACE: &str = "koli-system";

/// Field manager used for every patch issued by the controllers
pub const FIELD_MANAGER: &str = "koli-controller";
