use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::Value;

use crate::resources::pulps::{non_empty, Pulp};
use crate::{Error, Result};

use super::settings::SettingsInputs;
use super::storage::StorageBackend;
use super::workloads::Workload;
use super::{secrets, services, storage, workloads};

/// The cluster object kinds the engine manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Secret,
    Deployment,
    Service,
    PersistentVolumeClaim,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Service => "Service",
            ObjectKind::PersistentVolumeClaim => "PersistentVolumeClaim",
        })
    }
}

/// A typed managed sub-resource, either freshly built or as observed in the cluster
#[derive(Clone, Debug)]
pub enum ManagedObject {
    Secret(Secret),
    Deployment(Deployment),
    Service(Service),
    PersistentVolumeClaim(PersistentVolumeClaim),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Secret(_) => ObjectKind::Secret,
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::PersistentVolumeClaim(_) => ObjectKind::PersistentVolumeClaim,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Secret(o) => o.meta(),
            ManagedObject::Deployment(o) => o.meta(),
            ManagedObject::Service(o) => o.meta(),
            ManagedObject::PersistentVolumeClaim(o) => o.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::Secret(o) => o.meta_mut(),
            ManagedObject::Deployment(o) => o.meta_mut(),
            ManagedObject::Service(o) => o.meta_mut(),
            ManagedObject::PersistentVolumeClaim(o) => o.meta_mut(),
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            ManagedObject::Secret(o) => serde_json::to_value(o)?,
            ManagedObject::Deployment(o) => serde_json::to_value(o)?,
            ManagedObject::Service(o) => serde_json::to_value(o)?,
            ManagedObject::PersistentVolumeClaim(o) => serde_json::to_value(o)?,
        })
    }

    pub fn from_value(kind: ObjectKind, value: Value) -> Result<Self> {
        Ok(match kind {
            ObjectKind::Secret => ManagedObject::Secret(serde_json::from_value(value)?),
            ObjectKind::Deployment => ManagedObject::Deployment(serde_json::from_value(value)?),
            ObjectKind::Service => ManagedObject::Service(serde_json::from_value(value)?),
            ObjectKind::PersistentVolumeClaim => {
                ManagedObject::PersistentVolumeClaim(serde_json::from_value(value)?)
            }
        })
    }
}

/// Registry of every managed sub-resource. Each variant owns its builder, so adding a
/// resource without a way to build it does not compile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    FileStorage,
    ServerSecret,
    DbFieldsEncryptionSecret,
    AdminPasswordSecret,
    ContainerAuthSecret,
    ApiDeployment,
    ApiService,
    ContentDeployment,
    ContentService,
}

impl ManagedKind {
    pub fn object_kind(self) -> ObjectKind {
        match self {
            ManagedKind::FileStorage => ObjectKind::PersistentVolumeClaim,
            ManagedKind::ServerSecret
            | ManagedKind::DbFieldsEncryptionSecret
            | ManagedKind::AdminPasswordSecret
            | ManagedKind::ContainerAuthSecret => ObjectKind::Secret,
            ManagedKind::ApiDeployment | ManagedKind::ContentDeployment => ObjectKind::Deployment,
            ManagedKind::ApiService | ManagedKind::ContentService => ObjectKind::Service,
        }
    }

    /// Human label used in condition reasons and event text
    pub fn alias(self) -> &'static str {
        match self {
            ManagedKind::FileStorage => "FileStorage",
            ManagedKind::ServerSecret => "Server",
            ManagedKind::DbFieldsEncryptionSecret => "DBFieldsEncryption",
            ManagedKind::AdminPasswordSecret => "AdminPassword",
            ManagedKind::ContainerAuthSecret => "ContainerAuth",
            ManagedKind::ApiDeployment | ManagedKind::ApiService => "Api",
            ManagedKind::ContentDeployment | ManagedKind::ContentService => "Content",
        }
    }

    pub fn workload(self) -> Workload {
        match self {
            ManagedKind::ContentDeployment | ManagedKind::ContentService => Workload::Content,
            _ => Workload::Api,
        }
    }

    /// Generated secrets (random passwords and keys) are created once and never rebuilt
    pub fn drift_checked(self) -> bool {
        !matches!(
            self,
            ManagedKind::DbFieldsEncryptionSecret
                | ManagedKind::AdminPasswordSecret
                | ManagedKind::ContainerAuthSecret
        )
    }

    /// Workloads that mount this resource as shared configuration and must be restarted when
    /// it changes
    pub fn dependents(self) -> &'static [ManagedKind] {
        match self {
            ManagedKind::ServerSecret => {
                &[ManagedKind::ApiDeployment, ManagedKind::ContentDeployment]
            }
            _ => &[],
        }
    }

    pub fn build(self, ctx: &BuildContext<'_>) -> Result<ManagedObject> {
        Ok(match self {
            ManagedKind::FileStorage => {
                ManagedObject::PersistentVolumeClaim(storage::file_storage_pvc(ctx)?)
            }
            ManagedKind::ServerSecret => ManagedObject::Secret(secrets::server_secret(ctx)),
            ManagedKind::DbFieldsEncryptionSecret => {
                ManagedObject::Secret(secrets::db_fields_encryption_secret(ctx))
            }
            ManagedKind::AdminPasswordSecret => {
                ManagedObject::Secret(secrets::admin_password_secret(ctx))
            }
            ManagedKind::ContainerAuthSecret => {
                ManagedObject::Secret(secrets::container_auth_secret(ctx)?)
            }
            ManagedKind::ApiDeployment => {
                ManagedObject::Deployment(workloads::pulp_deployment(ctx, Workload::Api))
            }
            ManagedKind::ApiService => {
                ManagedObject::Service(services::pulp_service(ctx, Workload::Api))
            }
            ManagedKind::ContentDeployment => {
                ManagedObject::Deployment(workloads::pulp_deployment(ctx, Workload::Content))
            }
            ManagedKind::ContentService => {
                ManagedObject::Service(services::pulp_service(ctx, Workload::Content))
            }
        })
    }
}

/// Names of every managed object, resolved once per pass from the descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNames {
    pub file_storage: String,
    pub server: String,
    pub db_fields_encryption: String,
    pub admin_password: String,
    pub container_auth: String,
    pub api: String,
    pub api_service: String,
    pub content: String,
    pub content_service: String,
}

impl ResourceNames {
    pub fn new(pulp: &Pulp) -> Self {
        let name = pulp.name_any();
        let spec = &pulp.spec;
        Self {
            file_storage: format!("{name}-file-storage"),
            server: format!("{name}-server"),
            db_fields_encryption: non_empty(&spec.db_fields_encryption_secret)
                .map(Into::into)
                .unwrap_or_else(|| format!("{name}-db-fields-encryption")),
            admin_password: non_empty(&spec.admin_password_secret)
                .map(Into::into)
                .unwrap_or_else(|| format!("{name}-admin-password")),
            container_auth: non_empty(&spec.container_token_secret)
                .map(Into::into)
                .unwrap_or_else(|| format!("{name}-container-auth")),
            api: format!("{name}-api"),
            api_service: format!("{name}-api-svc"),
            content: format!("{name}-content"),
            content_service: format!("{name}-content-svc"),
        }
    }

    pub fn name_of(&self, kind: ManagedKind) -> &str {
        match kind {
            ManagedKind::FileStorage => &self.file_storage,
            ManagedKind::ServerSecret => &self.server,
            ManagedKind::DbFieldsEncryptionSecret => &self.db_fields_encryption,
            ManagedKind::AdminPasswordSecret => &self.admin_password,
            ManagedKind::ContainerAuthSecret => &self.container_auth,
            ManagedKind::ApiDeployment => &self.api,
            ManagedKind::ApiService => &self.api_service,
            ManagedKind::ContentDeployment => &self.content,
            ManagedKind::ContentService => &self.content_service,
        }
    }
}

/// Read-only inputs shared by all builders during one pass
pub struct BuildContext<'a> {
    pub pulp: &'a Pulp,
    pub names: &'a ResourceNames,
    pub storage: StorageBackend,
    pub settings: &'a SettingsInputs,
}

/// One managed sub-resource to reconcile in the current pass
#[derive(Clone, Debug)]
pub struct ResourceDefinition<'a> {
    pub kind: ManagedKind,
    pub name: String,
    pub namespace: String,
    pub alias: &'static str,
    pub condition_type: String,
    pub owner: &'a Pulp,
}

impl<'a> ResourceDefinition<'a> {
    pub fn new(
        owner: &'a Pulp,
        kind: ManagedKind,
        names: &ResourceNames,
        namespace: &str,
        condition_type: String,
    ) -> Self {
        Self {
            kind,
            name: names.name_of(kind).to_owned(),
            namespace: namespace.to_owned(),
            alias: kind.alias(),
            condition_type,
            owner,
        }
    }

    pub fn object_kind(&self) -> ObjectKind {
        self.kind.object_kind()
    }

    /// Run the builder and stamp the result with this definition's identity and the owner
    /// reference that makes the descriptor's deletion cascade
    pub fn build(&self, ctx: &BuildContext<'_>) -> Result<ManagedObject> {
        let owner_reference = self.owner.controller_owner_ref(&()).ok_or_else(|| {
            Error::MissingObjectKey(format!("Pulp {}", self.owner.name_any()), "uid")
        })?;

        let mut object = self.kind.build(ctx)?;
        let meta = object.meta_mut();
        meta.name = Some(self.name.clone());
        meta.namespace = Some(self.namespace.clone());
        meta.owner_references = Some(vec![owner_reference]);
        Ok(object)
    }
}
