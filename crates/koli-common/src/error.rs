//! Error types for the Koli controllers
//!
//! Errors carry the object key or resource name they relate to so a log line
//! alone is enough to find the offending object.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Koli controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde_json error
        #[from]
        source: serde_json::Error,
    },

    /// A queue or cache key could not be split into namespace and name
    #[error("unexpected key format: {key:?}")]
    InvalidKey {
        /// The offending key
        key: String,
    },

    /// A deployment references a storage plan missing from the plan cache
    #[error("storage plan {plan:?} not found for {key}")]
    PlanNotFound {
        /// Key of the deployment being reconciled
        key: String,
        /// Name of the missing plan
        plan: String,
    },

    /// A deployment lacks an annotation required to build a release
    #[error("missing required key {annotation:?} on {key}")]
    MissingAnnotation {
        /// Key of the deployment being reconciled
        key: String,
        /// The annotation that is absent
        annotation: String,
    },

    /// A custom resource definition was rejected because its names conflict
    #[error("name conflict for custom resource definition {name}: {reason}")]
    CrdNameConflict {
        /// Name of the custom resource definition
        name: String,
        /// Reason reported by the API server
        reason: String,
    },

    /// A custom resource definition did not become established in time
    #[error("timed out after {timeout:?} waiting for custom resource definition {name}")]
    CrdTimeout {
        /// Name of the custom resource definition
        name: String,
        /// The polling budget that was exhausted
        timeout: Duration,
    },

    /// An add-on declaration names a type outside the implemented catalog
    #[error("invalid add-on type ({addon_type})")]
    UnsupportedAddon {
        /// The declared add-on type
        addon_type: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "app-manager", "informer")
        context: String,
    },
}

impl Error {
    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create a plan not found error for the given deployment key
    pub fn plan_not_found(key: impl Into<String>, plan: impl Into<String>) -> Self {
        Self::PlanNotFound {
            key: key.into(),
            plan: plan.into(),
        }
    }

    /// Create a missing annotation error for the given deployment key
    pub fn missing_annotation(key: impl Into<String>, annotation: impl Into<String>) -> Self {
        Self::MissingAnnotation {
            key: key.into(),
            annotation: annotation.into(),
        }
    }

    /// Create an unsupported add-on error
    pub fn unsupported_addon(addon_type: impl Into<String>) -> Self {
        Self::UnsupportedAddon {
            addon_type: addon_type.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is a create collision ("already exists")
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409 && ae.reason == "AlreadyExists")
    }

    /// Check if this error is a not found response from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Check if retrying the failed operation can succeed without outside help
    ///
    /// Missing plans and annotations are retryable: an operator can fix the
    /// object and the next attempt picks the fix up. Name conflicts and
    /// unsupported add-ons never resolve on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if ae.code == 400 || ae.code == 422
            ),
            Error::Serialization { .. } => false,
            Error::InvalidKey { .. } => false,
            Error::PlanNotFound { .. } => true,
            Error::MissingAnnotation { .. } => true,
            Error::CrdNameConflict { .. } => false,
            Error::CrdTimeout { .. } => true,
            Error::UnsupportedAddon { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}
