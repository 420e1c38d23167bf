//! In-memory stand-ins for the cluster and the event recorder

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::core::ErrorResponse;
use kube::ResourceExt;
use serde_json::{json, Value};

use crate::resources::pulps::{Pulp, PulpSpec, PulpStatus};
use crate::Result;

use super::definition::{ManagedObject, ObjectKind};
use super::{ClusterApi, EventSeverity, EventSink};

pub const NAMESPACE: &str = "pulp";

type Key = (ObjectKind, String, String);

fn api_error(code: u16, reason: &str) -> crate::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("fake apiserver: {reason}"),
        reason: reason.into(),
        code,
    })
    .into()
}

fn key_of(object: &ManagedObject) -> Key {
    let meta = object.meta();
    (
        object.kind(),
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

// RFC 7386
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

// fields a real apiserver fills in on write
fn apply_server_defaults(object: &mut Value, kind: ObjectKind) {
    match kind {
        ObjectKind::Deployment => {
            merge(
                object,
                &json!({"spec": {"revisionHistoryLimit": 10, "progressDeadlineSeconds": 600}}),
            );
            if let Some(containers) = object
                .pointer_mut("/spec/template/spec/containers")
                .and_then(Value::as_array_mut)
            {
                for container in containers {
                    merge(
                        container,
                        &json!({"terminationMessagePath": "/dev/termination-log"}),
                    );
                }
            }
        }
        ObjectKind::Service => {
            merge(
                object,
                &json!({"spec": {"clusterIP": "10.96.0.10", "clusterIPs": ["10.96.0.10"]}}),
            );
        }
        ObjectKind::Secret => {
            merge(object, &json!({"type": "Opaque"}));
        }
        ObjectKind::PersistentVolumeClaim => {
            merge(object, &json!({"spec": {"volumeMode": "Filesystem"}}));
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, ManagedObject>,
    resource_version: u64,
    creates: Vec<String>,
    updates: Vec<String>,
    restarts: Vec<String>,
    status_patches: usize,
    spec_patches: usize,
    failing_gets: BTreeSet<ObjectKind>,
    failing_creates: BTreeSet<ObjectKind>,
    failing_restarts: bool,
    get_delay: Option<Duration>,
    conflict_on_update: bool,
    pulp: Option<Pulp>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn with_pulp(pulp: Pulp) -> Self {
        let cluster = Self::default();
        cluster.state.lock().unwrap().pulp = Some(pulp);
        cluster
    }

    /// The Pulp as stored after every spec and status patch so far
    pub fn pulp(&self) -> Pulp {
        self.state.lock().unwrap().pulp.clone().unwrap()
    }

    pub fn insert(&self, object: ManagedObject) {
        let mut state = self.state.lock().unwrap();
        state.resource_version += 1;
        let mut object = object;
        object.meta_mut().resource_version = Some(state.resource_version.to_string());
        state.objects.insert(key_of(&object), object);
    }

    pub fn object(&self, kind: ObjectKind, name: &str) -> Option<ManagedObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind, NAMESPACE.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Simulate an out-of-band edit of a stored object
    pub fn edit(&self, kind: ObjectKind, name: &str, patch: Value) {
        let mut state = self.state.lock().unwrap();
        state.resource_version += 1;
        let rv = state.resource_version.to_string();
        let key = (kind, NAMESPACE.to_owned(), name.to_owned());
        let object = state.objects.get(&key).unwrap();
        let mut value = object.to_value().unwrap();
        merge(&mut value, &patch);
        let mut object = ManagedObject::from_value(kind, value).unwrap();
        object.meta_mut().resource_version = Some(rv);
        state.objects.insert(key, object);
    }

    pub fn fail_gets(&self, kind: ObjectKind) {
        self.state.lock().unwrap().failing_gets.insert(kind);
    }

    pub fn fail_creates(&self, kind: ObjectKind) {
        self.state.lock().unwrap().failing_creates.insert(kind);
    }

    pub fn fail_restarts(&self, fail: bool) {
        self.state.lock().unwrap().failing_restarts = fail;
    }

    /// Make every lookup take `delay`
    pub fn slow_gets(&self, delay: Duration) {
        self.state.lock().unwrap().get_delay = Some(delay);
    }

    pub fn conflict_on_update(&self) {
        self.state.lock().unwrap().conflict_on_update = true;
    }

    pub fn creates(&self) -> Vec<String> {
        self.state.lock().unwrap().creates.clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.state.lock().unwrap().restarts.clone()
    }

    pub fn status_patches(&self) -> usize {
        self.state.lock().unwrap().status_patches
    }

    pub fn spec_patches(&self) -> usize {
        self.state.lock().unwrap().spec_patches
    }

    pub fn reset_counters(&self) {
        let mut state = self.state.lock().unwrap();
        state.creates.clear();
        state.updates.clear();
        state.restarts.clear();
        state.status_patches = 0;
        state.spec_patches = 0;
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        let delay = self.state.lock().unwrap().get_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        if state.failing_gets.contains(&kind) {
            return Err(api_error(500, "InternalError"));
        }
        Ok(state
            .objects
            .get(&(kind, namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(object);
        if state.failing_creates.contains(&key.0) {
            return Err(api_error(500, "InternalError"));
        }
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.resource_version += 1;

        let mut value = object.to_value()?;
        apply_server_defaults(&mut value, key.0);
        let mut stored = ManagedObject::from_value(key.0, value)?;
        let meta = stored.meta_mut();
        meta.resource_version = Some(state.resource_version.to_string());
        meta.uid = Some(format!("uid-{}", state.resource_version));

        state.creates.push(key.2.clone());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject> {
        let mut state = self.state.lock().unwrap();
        if state.conflict_on_update {
            return Err(api_error(409, "Conflict"));
        }
        let key = key_of(object);
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if current.meta().resource_version != object.meta().resource_version {
            return Err(api_error(409, "Conflict"));
        }
        state.resource_version += 1;

        let mut value = object.to_value()?;
        apply_server_defaults(&mut value, key.0);
        let mut stored = ManagedObject::from_value(key.0, value)?;
        stored.meta_mut().resource_version = Some(state.resource_version.to_string());

        state.updates.push(key.2.clone());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn restart(
        &self,
        namespace: &str,
        deployment: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.failing_restarts {
            return Err(api_error(500, "InternalError"));
        }
        let key = (
            ObjectKind::Deployment,
            namespace.to_owned(),
            deployment.to_owned(),
        );
        let Some(current) = state.objects.get(&key) else {
            return Ok(false);
        };
        let mut value = current.to_value()?;
        merge(
            &mut value,
            &json!({"spec": {"template": {"metadata": {"annotations": annotations}}}}),
        );
        state.resource_version += 1;
        let mut stored = ManagedObject::from_value(ObjectKind::Deployment, value)?;
        stored.meta_mut().resource_version = Some(state.resource_version.to_string());

        state.restarts.push(deployment.to_owned());
        state.objects.insert(key, stored);
        Ok(true)
    }

    async fn patch_spec(&self, _pulp: &Pulp, patch: &Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.spec_patches += 1;
        if let Some(pulp) = state.pulp.as_mut() {
            let mut spec = serde_json::to_value(&pulp.spec)?;
            merge(&mut spec, patch);
            pulp.spec = serde_json::from_value(spec)?;
        }
        Ok(())
    }

    async fn status(&self, _pulp: &Pulp) -> Result<Option<PulpStatus>> {
        let state = self.state.lock().unwrap();
        Ok(state.pulp.as_ref().and_then(|pulp| pulp.status.clone()))
    }

    async fn patch_status(&self, _pulp: &Pulp, status: &PulpStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.status_patches += 1;
        if let Some(pulp) = state.pulp.as_mut() {
            pulp.status = Some(status.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventSeverity, String, String)>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<(EventSeverity, String, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, reason, _)| reason).collect()
    }

    pub fn warnings(&self) -> usize {
        self.events()
            .iter()
            .filter(|(severity, _, _)| *severity == EventSeverity::Warning)
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(
        &self,
        _pulp: &Pulp,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((severity, reason.to_owned(), message));
        Ok(())
    }
}

pub fn secret_with(namespace: &str, name: &str, data: &[(&str, &str)]) -> ManagedObject {
    ManagedObject::Secret(Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_owned(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    })
}

pub fn test_pulp(spec: PulpSpec) -> Pulp {
    let mut pulp = Pulp::new("example", spec);
    pulp.metadata.namespace = Some(NAMESPACE.into());
    pulp.metadata.uid = Some("8a5c0e2e-pulp".into());
    pulp
}

/// A cluster holding `pulp` and the postgres configuration it reads
pub fn cluster_for(pulp: &Pulp) -> FakeCluster {
    let cluster = FakeCluster::with_pulp(pulp.clone());
    cluster.insert(secret_with(
        NAMESPACE,
        &format!("{}-postgres-configuration", pulp.name_any()),
        &[
            ("username", "pulp"),
            ("password", "initial"),
            ("database", "pulp"),
            ("port", "5432"),
            ("sslmode", "prefer"),
        ],
    ));
    cluster
}
