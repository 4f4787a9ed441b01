//! Object builders shared by every add-on kind
//!
//! Each add-on owns three objects named after it: a ConfigMap, a headless
//! Service and a StatefulSet. All carry the same selector labels and a
//! controller owner reference to the Addon when it has a uid.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use koli_common::meta::labels;
use kube::{Resource, ResourceExt};

use crate::crd::Addon;
use crate::kind::AddonKind;

/// Label value of `kolihub.io/type` on add-on objects
pub const TYPE_ADDON: &str = "addon";

const CONFIG_VOLUME: &str = "config";
const DATA_VOLUME: &str = "data";

/// Mount path of the add-on's ConfigMap inside the container
pub const CONFIG_MOUNT_PATH: &str = "/etc/koli";

/// Kind-specific parts of the StatefulSet container
#[derive(Clone, Debug, Default)]
pub struct ContainerProfile {
    /// Entrypoint and arguments, before the declared extra args
    pub command: Vec<String>,
    /// Where persistent data lives, if the kind keeps any
    pub data_path: Option<&'static str>,
}

/// Selector labels shared by every object of `addon`
pub fn selector_labels(addon: &Addon) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::APP.to_string(), addon.name_any()),
        (labels::TYPE.to_string(), TYPE_ADDON.to_string()),
    ])
}

fn metadata(addon: &Addon, kind: AddonKind) -> ObjectMeta {
    let mut object_labels = selector_labels(addon);
    object_labels.insert(labels::NAME.to_string(), kind.as_str().to_string());
    ObjectMeta {
        name: Some(addon.name_any()),
        namespace: addon.namespace(),
        labels: Some(object_labels),
        owner_references: addon.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// ConfigMap holding the files mounted at [`CONFIG_MOUNT_PATH`]
pub fn config_map(addon: &Addon, kind: AddonKind, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: metadata(addon, kind),
        data: Some(data),
        ..Default::default()
    }
}

/// Headless Service giving the StatefulSet pods stable DNS names
pub fn headless_service(addon: &Addon, kind: AddonKind, port: i32) -> Service {
    Service {
        metadata: metadata(addon, kind),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(addon)),
            ports: Some(vec![ServicePort {
                name: Some(kind.as_str().to_string()),
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// StatefulSet running the add-on's image
pub fn stateful_set(
    addon: &Addon,
    kind: AddonKind,
    port: i32,
    profile: &ContainerProfile,
) -> StatefulSet {
    let name = addon.name_any();
    let mut command = profile.command.clone();
    command.extend(addon.spec.args.iter().cloned());

    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    if let Some(path) = profile.data_path {
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        });
    }

    let env: Vec<EnvVar> = addon.spec.env.iter().map(EnvVar::from).collect();

    StatefulSet {
        metadata: metadata(addon, kind),
        spec: Some(StatefulSetSpec {
            service_name: Some(name.clone()),
            replicas: Some(addon.effective_replicas()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(addon)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels(addon)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: kind.as_str().to_string(),
                        image: Some(addon.image()),
                        command: Some(command),
                        env: (!env.is_empty()).then_some(env),
                        ports: Some(vec![ContainerPort {
                            name: Some(kind.as_str().to_string()),
                            container_port: port,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Copy the identity of `old` onto a freshly built StatefulSet for replace
pub fn carry_over(mut desired: StatefulSet, old: &StatefulSet) -> StatefulSet {
    desired.metadata.resource_version = old.metadata.resource_version.clone();
    desired.metadata.uid = old.metadata.uid.clone();
    if desired.metadata.namespace.is_none() {
        desired.metadata.namespace = old.namespace();
    }
    desired
}

/// Whether `obj` is one of the objects built here for `addon`
pub fn is_owned_by<K: Resource>(obj: &K, addon: &Addon) -> bool {
    match (obj.meta().owner_references.as_ref(), addon.uid()) {
        (Some(refs), Some(uid)) => refs.iter().any(|r| r.uid == uid),
        _ => false,
    }
}
