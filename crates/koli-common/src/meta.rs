//! Platform metadata conventions
//!
//! Every marker the controllers read or write is a plain string key/value
//! pair on the source object. An absent marker, or any value other than the
//! literal `"true"`, reads as false.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Annotation keys read from (and patched on) deployments
pub mod annotations {
    /// Trigger a new build/release when set to "true"
    pub const BUILD: &str = "kolihub.io/build";
    /// Provision the storage claim for the deployment when set to "true"
    pub const SETUP_STORAGE: &str = "kolihub.io/setup-storage";
    /// Deploy the release automatically after the build
    pub const AUTO_DEPLOY: &str = "kolihub.io/autodeploy";
    /// Where the build sources come from (e.g. "github")
    pub const BUILD_SOURCE: &str = "kolihub.io/buildsource";
    /// Git remote URL
    pub const GIT_REMOTE: &str = "kolihub.io/gitremote";
    /// Git branch
    pub const GIT_BRANCH: &str = "kolihub.io/gitbranch";
    /// Repository in `owner/name` form
    pub const GIT_REPOSITORY: &str = "kolihub.io/gitrepository";
    /// Head commit SHA
    pub const GIT_COMMIT_ID: &str = "kolihub.io/gitcommitid";
    /// Head commit author name
    pub const GIT_AUTHOR_NAME: &str = "kolihub.io/gitauthorname";
    /// Head commit author avatar URL
    pub const GIT_AUTHOR_AVATAR: &str = "kolihub.io/gitauthoravatar";
    /// Compare URL for the push
    pub const GIT_COMPARE: &str = "kolihub.io/gitcompare";
    /// Head commit message
    pub const GIT_COMMIT_MESSAGE: &str = "kolihub.io/gitcommitmessage";
    /// Head commit URL
    pub const GIT_COMMIT_URL: &str = "kolihub.io/gitcommiturl";
    /// Namespace that owns the subdomains claimed by an ingress
    pub const PARENT: &str = "kolihub.io/parent";
}

/// Label keys
pub mod labels {
    /// Resource type ("app" for user applications)
    pub const TYPE: &str = "kolihub.io/type";
    /// Application name used in service selectors
    pub const NAME: &str = "kolihub.io/name";
    /// Storage plan requested by a deployment
    pub const STORAGE_PLAN: &str = "kolihub.io/storagetype";
    /// Correlates a release with its originating deployment
    pub const DEPLOY: &str = "kolihub.io/deploy";
    /// Short git revision of a release
    pub const GIT_REVISION: &str = "kolihub.io/gitrevision";
    /// Application label carried by build pods
    pub const APP: &str = "app";
    /// Value of [`TYPE`] for user applications
    pub const TYPE_APP: &str = "app";
}

/// Look up an annotation value
pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    lookup(meta.annotations.as_ref(), key)
}

/// Look up a label value
pub fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    lookup(meta.labels.as_ref(), key)
}

fn lookup<'a>(map: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    map.and_then(|m| m.get(key)).map(String::as_str)
}

/// True only when the annotation is present with the literal value "true"
pub fn annotation_is_true(meta: &ObjectMeta, key: &str) -> bool {
    annotation(meta, key) == Some("true")
}

/// JSON merge patch setting a single annotation to a boolean string
///
/// `{"metadata":{"annotations":{"<key>":"<bool>"}}}`
pub fn annotation_patch(key: &str, value: bool) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "annotations": {
                key: value.to_string(),
            }
        }
    })
}

/// Parsed platform namespace: `<name>-<customer>-<organization>`
///
/// Namespaces outside this shape do not belong to the platform and their
/// objects are ignored by the controllers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceMetadata {
    /// Environment name (e.g. "prod")
    pub name: String,
    /// Customer owning the namespace
    pub customer: String,
    /// Organization the customer belongs to
    pub organization: String,
}

impl NamespaceMetadata {
    /// Parse a namespace, returning `None` when it is not a platform namespace
    pub fn parse(namespace: &str) -> Option<Self> {
        let mut parts = namespace.split('-');
        let (name, customer, organization) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        if ![name, customer, organization]
            .iter()
            .all(|segment| is_valid_segment(segment))
        {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            customer: customer.to_string(),
            organization: organization.to_string(),
        })
    }

    /// Whether the namespace follows the platform convention
    pub fn is_valid(namespace: &str) -> bool {
        Self::parse(namespace).is_some()
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Short form of a full 40 character hex commit SHA
///
/// Returns `None` for anything that is not a full SHA so a malformed commit
/// annotation never leaks into a label value.
pub fn short_sha(commit: &str) -> Option<&str> {
    if commit.len() == 40 && commit.chars().all(|c| c.is_ascii_hexdigit()) {
        commit.get(..7)
    } else {
        None
    }
}
