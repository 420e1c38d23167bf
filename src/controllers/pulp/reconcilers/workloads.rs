use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::resources::pulps::{non_empty, PulpComponent};

use super::definition::BuildContext;
use super::settings::{settings_hash, SETTINGS_HASH_ANNOTATION};
use super::storage::StorageBackend;
use super::{component_labels, label_selector, object_meta};

pub const DEFAULT_IMAGE: &str = "quay.io/pulp/pulp-minimal";
pub const DEFAULT_IMAGE_VERSION: &str = "stable";

/// The two long-running Pulp components
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    Api,
    Content,
}

impl Workload {
    pub fn component(self) -> &'static str {
        match self {
            Workload::Api => "api",
            Workload::Content => "content",
        }
    }

    pub fn port(self) -> i32 {
        match self {
            Workload::Api => 24817,
            Workload::Content => 24816,
        }
    }

    pub fn port_name(self) -> String {
        format!("{}-{}", self.component(), self.port())
    }

    fn command(self) -> &'static str {
        match self {
            Workload::Api => "pulp-api",
            Workload::Content => "pulp-content",
        }
    }

    fn readiness_probe(self) -> Probe {
        match self {
            Workload::Api => Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/pulp/api/v3/status/".into()),
                    port: IntOrString::Int(self.port()),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(60),
                period_seconds: Some(10),
                failure_threshold: Some(10),
                ..Default::default()
            },
            Workload::Content => Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::Int(self.port()),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(30),
                period_seconds: Some(10),
                ..Default::default()
            },
        }
    }
}

fn image(ctx: &BuildContext<'_>) -> String {
    let spec = &ctx.pulp.spec;
    format!(
        "{}:{}",
        non_empty(&spec.image).unwrap_or(DEFAULT_IMAGE),
        non_empty(&spec.image_version).unwrap_or(DEFAULT_IMAGE_VERSION)
    )
}

fn secret_file(volume: &str, mount_path: &str, key: &str) -> VolumeMount {
    VolumeMount {
        name: volume.into(),
        mount_path: mount_path.into(),
        sub_path: Some(key.into()),
        read_only: Some(true),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volumes(ctx: &BuildContext<'_>, workload: Workload) -> (Vec<Volume>, Vec<VolumeMount>) {
    let names = ctx.names;
    let mut volumes = vec![
        secret_volume("server", &names.server),
        secret_volume("db-fields-encryption", &names.db_fields_encryption),
    ];
    let mut mounts = vec![
        secret_file("server", "/etc/pulp/settings.py", "settings.py"),
        secret_file(
            "db-fields-encryption",
            "/etc/pulp/keys/database_fields.symmetric.key",
            "database_fields.symmetric.key",
        ),
    ];

    // only the api signs registry tokens
    if workload == Workload::Api {
        volumes.push(secret_volume("container-auth", &names.container_auth));
        for key in [
            "container_auth_private_key.pem",
            "container_auth_public_key.pem",
        ] {
            mounts.push(secret_file(
                "container-auth",
                &format!("/etc/pulp/keys/{key}"),
                key,
            ));
        }
    }

    match &ctx.storage {
        StorageBackend::StorageClass { .. } => {
            volumes.push(Volume {
                name: "file-storage".into(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: names.file_storage.clone(),
                    read_only: None,
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: "file-storage".into(),
                mount_path: "/var/lib/pulp".into(),
                ..Default::default()
            });
        }
        StorageBackend::EmptyDir => {
            volumes.push(Volume {
                name: "file-storage".into(),
                empty_dir: Some(Default::default()),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: "file-storage".into(),
                mount_path: "/var/lib/pulp".into(),
                ..Default::default()
            });
        }
        // artifacts go to the bucket; uploads still need scratch space
        StorageBackend::Azure { .. } | StorageBackend::S3 { .. } => {
            volumes.push(Volume {
                name: "tmp-file-storage".into(),
                empty_dir: Some(Default::default()),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: "tmp-file-storage".into(),
                mount_path: "/var/lib/pulp/tmp".into(),
                ..Default::default()
            });
        }
    }

    (volumes, mounts)
}

/// Pod template annotations that tie the pods to the settings they were started with
pub fn settings_annotations(ctx: &BuildContext<'_>) -> BTreeMap<String, String> {
    BTreeMap::from([(
        SETTINGS_HASH_ANNOTATION.to_owned(),
        settings_hash(ctx.pulp, ctx.settings),
    )])
}

pub fn pulp_deployment(ctx: &BuildContext<'_>, workload: Workload) -> Deployment {
    let pulp = ctx.pulp;
    let component: &PulpComponent = match workload {
        Workload::Api => &pulp.spec.api,
        Workload::Content => &pulp.spec.content,
    };
    let name = match workload {
        Workload::Api => &ctx.names.api,
        Workload::Content => &ctx.names.content,
    };

    let mut labels = component_labels(pulp, workload.component());
    labels.insert("app".into(), format!("pulp-{}", workload.component()));
    let (volumes, volume_mounts) = volumes(ctx, workload);

    Deployment {
        metadata: object_meta(pulp, name, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(component.replicas.unwrap_or(1)),
            selector: label_selector(pulp, workload.component()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(settings_annotations(ctx)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: workload.component().into(),
                        image: Some(image(ctx)),
                        image_pull_policy: non_empty(&pulp.spec.image_pull_policy)
                            .map(Into::into),
                        args: Some(vec![workload.command().into()]),
                        ports: Some(vec![ContainerPort {
                            container_port: workload.port(),
                            protocol: Some("TCP".into()),
                            ..Default::default()
                        }]),
                        readiness_probe: Some(workload.readiness_probe()),
                        resources: component.resource_requirements.clone(),
                        volume_mounts: Some(volume_mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
