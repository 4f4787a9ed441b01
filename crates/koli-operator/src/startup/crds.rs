//! Custom resource types owned by the platform
//!
//! The operator creates its CRDs on startup and blocks until the API server
//! reports each one established, so informers never watch an unknown type.

use kube::Client;

use koli_addon::Addon;
use koli_controller::crd_provisioner::{
    platform_resources, CrdProvisioner, KubeCrdClient, ResourceDeclaration,
};

/// Every CRD the platform owns: the watched types plus the add-on catalog
pub fn all_crds() -> Vec<ResourceDeclaration> {
    let mut crds = platform_resources();
    crds.push(ResourceDeclaration::of::<Addon>());
    crds
}

/// All CRDs as one multi-document YAML stream
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for decl in all_crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&decl.definition)?);
    }
    Ok(out)
}

/// Create every CRD and wait until each is established
pub async fn ensure_crds_established(client: &Client) -> Result<(), koli_common::Error> {
    let crds = all_crds();
    tracing::info!(count = crds.len(), "Provisioning CRDs");
    CrdProvisioner::new(KubeCrdClient::new(client.clone()))
        .provision(&crds)
        .await?;
    tracing::info!("All CRDs established");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_owns_plan_release_and_addon() {
        let names: Vec<String> = all_crds().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "plans.platform.koli.io",
                "releases.platform.koli.io",
                "addons.platform.koli.io",
            ]
        );
    }

    #[test]
    fn manifests_contain_every_kind() {
        let yaml = crd_manifests().expect("serializable");
        assert_eq!(yaml.matches("---\n").count(), 3);
        for kind in ["kind: Plan", "kind: Release", "kind: Addon"] {
            assert!(yaml.contains(kind), "missing {kind}");
        }
    }
}
