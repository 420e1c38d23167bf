use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tracing::warn;

use crate::resources::pulps::{non_empty, Pulp, PulpSpec};
use crate::{Error, Result};

use super::definition::BuildContext;
use super::{component_labels, object_meta};

const DEFAULT_ACCESS_MODE: &str = "ReadWriteMany";

/// Where Pulp keeps its artifacts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Azure { secret: String },
    S3 { secret: String },
    StorageClass { class: String },
    /// Nothing configured; artifacts live in a pod-local emptyDir
    EmptyDir,
}

impl StorageBackend {
    pub fn is_object_storage(&self) -> bool {
        matches!(self, StorageBackend::Azure { .. } | StorageBackend::S3 { .. })
    }

    pub fn is_storage_class(&self) -> bool {
        matches!(self, StorageBackend::StorageClass { .. })
    }
}

/// Pick the storage backend from the mutually exclusive storage fields.
///
/// Precedence is Azure, then S3, then a StorageClass. Configuring more than one is logged
/// and the first in that order wins.
pub fn storage_backend(pulp: &Pulp) -> StorageBackend {
    let spec: &PulpSpec = &pulp.spec;
    let mut configured = Vec::new();
    if let Some(secret) = non_empty(&spec.object_storage_azure_secret) {
        configured.push(StorageBackend::Azure {
            secret: secret.into(),
        });
    }
    if let Some(secret) = non_empty(&spec.object_storage_s3_secret) {
        configured.push(StorageBackend::S3 {
            secret: secret.into(),
        });
    }
    if let Some(class) = non_empty(&spec.file_storage_class) {
        configured.push(StorageBackend::StorageClass {
            class: class.into(),
        });
    }

    if configured.len() > 1 {
        warn!(
            "Pulp {} configures more than one storage backend ({configured:?}); using {:?}",
            pulp.name_any(),
            configured[0]
        );
    }

    configured
        .into_iter()
        .next()
        .unwrap_or(StorageBackend::EmptyDir)
}

/// Whether the file storage PersistentVolumeClaim belongs in the work list
pub fn is_storage_class_backend(pulp: &Pulp) -> bool {
    storage_backend(pulp).is_storage_class()
}

pub fn file_storage_pvc(ctx: &BuildContext<'_>) -> Result<PersistentVolumeClaim> {
    let pulp = ctx.pulp;
    let spec = &pulp.spec;
    let class = match &ctx.storage {
        StorageBackend::StorageClass { class } => class.clone(),
        other => {
            return Err(Error::InvalidPulpConfig(format!(
                "file storage claim requested with storage backend {other:?}"
            )))
        }
    };
    let size = non_empty(&spec.file_storage_size).ok_or_else(|| {
        Error::InvalidPulpConfig("fileStorageSize is required with fileStorageClass".into())
    })?;
    let access_mode = non_empty(&spec.file_storage_access_mode).unwrap_or(DEFAULT_ACCESS_MODE);

    Ok(PersistentVolumeClaim {
        metadata: object_meta(
            pulp,
            &ctx.names.file_storage,
            component_labels(pulp, "storage"),
        ),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![access_mode.into()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_owned(),
                    Quantity(size.into()),
                )])),
                ..Default::default()
            }),
            storage_class_name: Some(class),
            ..Default::default()
        }),
        status: None,
    })
}
