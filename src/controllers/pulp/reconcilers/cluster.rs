use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::resources::pulps::{Pulp, PulpStatus};
use crate::{Error, Result};

use super::definition::{ManagedObject, ObjectKind};
use super::FIELD_MANAGER;

/// Access to the cluster object store, as seen by the convergence engine
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Look an object up; `Ok(None)` when it does not exist
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str)
        -> Result<Option<ManagedObject>>;

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject>;

    /// Replace an object. The object must carry the resourceVersion it was read at, so a
    /// concurrent modification surfaces as a conflict.
    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject>;

    /// Roll the pods of a deployment by writing `annotations` into its pod template. Returns
    /// false when the deployment does not exist.
    async fn restart(
        &self,
        namespace: &str,
        deployment: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<bool>;

    async fn patch_spec(&self, pulp: &Pulp, patch: &Value) -> Result<()>;

    async fn patch_status(&self, pulp: &Pulp, status: &PulpStatus) -> Result<()>;

    /// The stored status of `pulp`, read from the server rather than from a watch cache
    async fn status(&self, pulp: &Pulp) -> Result<Option<PulpStatus>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Observability events attached to the Pulp resource
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        pulp: &Pulp,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) -> Result<()>;
}

pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    }
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_typed<K>(&self, namespace: &str, object: &K) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        debug!(
            "Creating {} {} in namespace {namespace}",
            K::kind(&()),
            object.name_any()
        );
        Ok(self
            .api::<K>(namespace)
            .create(&post_params(), object)
            .await?)
    }

    async fn replace_typed<K>(&self, namespace: &str, object: &K) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let name = object.name_any();
        debug!("Replacing {} {name} in namespace {namespace}", K::kind(&()));
        Ok(self
            .api::<K>(namespace)
            .replace(&name, &post_params(), object)
            .await?)
    }
}

fn namespace_of(object: &ManagedObject) -> Result<String> {
    object.meta().namespace.clone().ok_or_else(|| {
        Error::MissingObjectKey(format!("{} {}", object.kind(), object.name()), "namespace")
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        Ok(match kind {
            ObjectKind::Secret => self
                .api::<Secret>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedObject::Secret),
            ObjectKind::Deployment => self
                .api::<Deployment>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedObject::Deployment),
            ObjectKind::Service => self
                .api::<Service>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedObject::Service),
            ObjectKind::PersistentVolumeClaim => self
                .api::<PersistentVolumeClaim>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedObject::PersistentVolumeClaim),
        })
    }

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject> {
        let ns = namespace_of(object)?;
        Ok(match object {
            ManagedObject::Secret(o) => ManagedObject::Secret(self.create_typed(&ns, o).await?),
            ManagedObject::Deployment(o) => {
                ManagedObject::Deployment(self.create_typed(&ns, o).await?)
            }
            ManagedObject::Service(o) => ManagedObject::Service(self.create_typed(&ns, o).await?),
            ManagedObject::PersistentVolumeClaim(o) => {
                ManagedObject::PersistentVolumeClaim(self.create_typed(&ns, o).await?)
            }
        })
    }

    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject> {
        let ns = namespace_of(object)?;
        Ok(match object {
            ManagedObject::Secret(o) => ManagedObject::Secret(self.replace_typed(&ns, o).await?),
            ManagedObject::Deployment(o) => {
                ManagedObject::Deployment(self.replace_typed(&ns, o).await?)
            }
            ManagedObject::Service(o) => {
                ManagedObject::Service(self.replace_typed(&ns, o).await?)
            }
            ManagedObject::PersistentVolumeClaim(o) => {
                ManagedObject::PersistentVolumeClaim(self.replace_typed(&ns, o).await?)
            }
        })
    }

    async fn restart(
        &self,
        namespace: &str,
        deployment: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<bool> {
        debug!("Restarting Deployment {deployment} in namespace {namespace}");
        let patch = json!({"spec": {"template": {"metadata": {"annotations": annotations}}}});
        match self
            .api::<Deployment>(namespace)
            .patch(deployment, &patch_params(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn patch_spec(&self, pulp: &Pulp, patch: &Value) -> Result<()> {
        let namespace = pulp.namespace().unwrap_or_default();
        let pulps: Api<Pulp> = Api::namespaced(self.client.clone(), &namespace);
        pulps
            .patch(
                &pulp.name_any(),
                &patch_params(),
                &Patch::Merge(json!({ "spec": patch })),
            )
            .await?;
        Ok(())
    }

    async fn status(&self, pulp: &Pulp) -> Result<Option<PulpStatus>> {
        let namespace = pulp.namespace().unwrap_or_default();
        let pulps: Api<Pulp> = Api::namespaced(self.client.clone(), &namespace);
        match pulps.get_status(&pulp.name_any()).await {
            Ok(stored) => Ok(stored.status),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn patch_status(&self, pulp: &Pulp, status: &PulpStatus) -> Result<()> {
        let namespace = pulp.namespace().unwrap_or_default();
        let pulps: Api<Pulp> = Api::namespaced(self.client.clone(), &namespace);
        pulps
            .patch_status(
                &pulp.name_any(),
                &patch_params(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;
        Ok(())
    }
}

/// Publishes events through the kube event recorder
#[derive(Clone)]
pub struct RecorderSink {
    recorder: Recorder,
}

impl RecorderSink {
    pub fn new(client: Client) -> Self {
        Self {
            recorder: Recorder::new(client, FIELD_MANAGER.into()),
        }
    }
}

#[async_trait]
impl EventSink for RecorderSink {
    async fn publish(
        &self,
        pulp: &Pulp,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) -> Result<()> {
        let type_ = match severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(message),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &pulp.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}
