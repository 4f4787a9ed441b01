//! Release CRD: one build/deploy intent
//!
//! Releases are created by the release controller from a deployment's git
//! annotations and are never mutated by it afterwards.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Release records a request to build (and optionally deploy) a revision.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.koli.io",
    version = "v1alpha1",
    kind = "Release",
    plural = "releases",
    namespaced,
    printcolumn = r#"{"name":"Deploy","type":"string","jsonPath":".spec.deployName"}"#,
    printcolumn = r#"{"name":"Branch","type":"string","jsonPath":".spec.gitBranch"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Git remote URL
    #[serde(default)]
    pub git_remote: String,

    /// Git branch
    #[serde(default)]
    pub git_branch: String,

    /// Repository in `owner/name` form
    #[serde(default)]
    pub git_repository: String,

    /// Commit that triggered the build
    #[serde(default)]
    pub head_commit: HeadCommit,

    /// Incrementing build revision. Not populated yet: releases are named
    /// after their deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_revision: Option<String>,

    /// Deploy automatically once the build finishes
    #[serde(default)]
    pub auto_deploy: bool,

    /// Deployment this release belongs to
    #[serde(default)]
    pub deploy_name: String,

    /// Build a new image for this release
    #[serde(default)]
    pub build: bool,

    /// Where the sources come from (e.g. "github")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Commit descriptor copied from the deployment's git annotations
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeadCommit {
    /// Commit SHA
    #[serde(default)]
    pub id: String,
    /// Author name
    #[serde(default)]
    pub author: String,
    /// Author avatar URL
    #[serde(default, rename = "avatarUrl")]
    pub avatar_url: String,
    /// Compare URL
    #[serde(default)]
    pub compare: String,
    /// Commit message
    #[serde(default)]
    pub message: String,
    /// Commit URL
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes_in_camel_case() {
        let spec = ReleaseSpec {
            git_remote: "https://github.com/acme/web.git".to_string(),
            head_commit: HeadCommit {
                avatar_url: "https://avatars/1".to_string(),
                ..Default::default()
            },
            deploy_name: "web".to_string(),
            build: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["gitRemote"], "https://github.com/acme/web.git");
        assert_eq!(value["headCommit"]["avatarUrl"], "https://avatars/1");
        assert_eq!(value["deployName"], "web");
        assert_eq!(value["build"], true);
        assert_eq!(value["autoDeploy"], false);
        assert!(value.get("buildRevision").is_none());
    }
}
