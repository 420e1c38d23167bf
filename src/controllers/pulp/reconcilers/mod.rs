use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use tracing::warn;

use crate::resources::pulps::Pulp;
use crate::Metrics;

pub mod api;
pub mod cluster;
pub mod conditions;
pub mod credentials;
pub mod definition;
pub mod drift;
pub mod ensure;
pub mod quantity;
pub mod restart;
pub mod secrets;
pub mod services;
pub mod settings;
pub mod storage;
pub mod workloads;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{ClusterApi, EventSeverity, EventSink, KubeCluster, RecorderSink};
pub use definition::{BuildContext, ManagedKind, ManagedObject, ObjectKind, ResourceDefinition};

pub const FIELD_MANAGER: &str = "pulp-operator";

// every object we create carries this label so the controller can watch just our objects
pub const PULP_CR_LABEL: &str = "pulp_cr";

/// Result of one reconciliation step.
///
/// Errors travel beside it as `Err`; either a requeue or an error ends the current pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }
}

/// The convergence engine. Holds no per-descriptor state; every pass starts from what the
/// cluster reports.
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    events: Arc<dyn EventSink>,
    metrics: Option<Metrics>,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, events: Arc<dyn EventSink>) -> Self {
        Self {
            cluster,
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn cluster(&self) -> &dyn ClusterApi {
        self.cluster.as_ref()
    }

    /// Events are best effort; a failed publish is logged and the pass carries on
    pub(crate) async fn publish(
        &self,
        pulp: &Pulp,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) {
        if let Err(err) = self.events.publish(pulp, severity, reason, message).await {
            warn!(
                "Failed to publish {reason} event for Pulp {}: {err}",
                pulp.name_any()
            );
        }
    }
}

// component_labels returns the labels applied to every object of a component
// selectors are built from these too, so changing them orphans existing pods
pub fn component_labels(pulp: &Pulp, component: &str) -> BTreeMap<String, String> {
    let deployment_type = pulp.spec.deployment_type();
    let name = pulp.name_any();
    BTreeMap::from_iter([
        (
            "app.kubernetes.io/name".into(),
            format!("{deployment_type}-{component}"),
        ),
        (
            "app.kubernetes.io/instance".into(),
            format!("{deployment_type}-{component}-{name}"),
        ),
        ("app.kubernetes.io/component".into(), component.into()),
        ("app.kubernetes.io/part-of".into(), deployment_type.into()),
        (
            "app.kubernetes.io/managed-by".into(),
            format!("{deployment_type}-operator"),
        ),
        (PULP_CR_LABEL.into(), name),
    ])
}

pub fn label_selector(pulp: &Pulp, component: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(component_labels(pulp, component)),
        match_expressions: None,
    }
}

pub fn object_meta(
    pulp: &Pulp,
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: pulp.namespace(),
        labels: Some(labels),
        ..Default::default()
    }
}
