use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, Service, ServiceSpec,
};
use k8s_openapi::ByteString;
use kube::runtime::{watcher, Predicate, WatchStreamExt};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource,
};
use serde::Serialize;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::{Diagnostics, State};
use crate::resources::pulps::Pulp;
use crate::{telemetry, Error, Metrics, Result};

use super::reconcilers::{
    EventSeverity, KubeCluster, ReconcileOutcome, Reconciler, RecorderSink, PULP_CR_LABEL,
};

// a create asks to come straight back; leave the apiserver a moment to settle first
const IMMEDIATE_REQUEUE: Duration = Duration::from_millis(500);
// converged Pulps are still revisited so that unowned inputs like the database secret are noticed
const RESYNC_PERIOD: Duration = Duration::from_secs(300);

// Context for our reconciler
#[derive(Clone)]
pub(super) struct Context {
    /// The convergence engine
    pub reconciler: Arc<Reconciler>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    // Upper bound for a single pass
    pub reconcile_timeout: Duration,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: State) -> Arc<Context> {
        let reconciler = Reconciler::new(
            Arc::new(KubeCluster::new(client.clone())),
            Arc::new(RecorderSink::new(client)),
        )
        .with_metrics(metrics.clone());

        Arc::new(Context {
            reconciler: Arc::new(reconciler),
            diagnostics: state.diagnostics.clone(),
            metrics,
            reconcile_timeout: state.reconcile_timeout,
        })
    }
}

fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome {
            requeue_after: Some(delay),
            ..
        } => Action::requeue(delay),
        ReconcileOutcome { requeue: true, .. } => Action::requeue(IMMEDIATE_REQUEUE),
        _ => Action::requeue(RESYNC_PERIOD),
    }
}

#[instrument(skip(ctx, pulp), fields(trace_id))]
async fn reconcile(pulp: Arc<Pulp>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<Pulp>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!("Reconciling Pulp \"{}\"", pulp.name_any());
    match ctx
        .reconciler
        .reconcile_pulp_within(&pulp, ctx.reconcile_timeout)
        .await
    {
        Ok(outcome) => Ok(action_for(outcome)),
        Err(err) => {
            warn!("Reconcile of Pulp {} failed: {err}", pulp.name_any());
            ctx.reconciler
                .publish(
                    &pulp,
                    EventSeverity::Warning,
                    "FailedReconcile",
                    format!("Error reconciling Pulp: {err}"),
                )
                .await;
            ctx.metrics.reconcile_failure(pulp.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_pulp: Arc<K>, _error: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

pub async fn run(client: Client, metrics: Metrics, state: State) {
    let (pulp_api, deploy_api, svc_api, secret_api, pvc_api) = match &state.watch_namespace {
        Some(namespace) => {
            info!("Watching Pulp resources in namespace {namespace}");
            (
                Api::<Pulp>::namespaced(client.clone(), namespace),
                Api::<Deployment>::namespaced(client.clone(), namespace),
                Api::<Service>::namespaced(client.clone(), namespace),
                Api::<Secret>::namespaced(client.clone(), namespace),
                Api::<PersistentVolumeClaim>::namespaced(client.clone(), namespace),
            )
        }
        None => (
            Api::<Pulp>::all(client.clone()),
            Api::<Deployment>::all(client.clone()),
            Api::<Service>::all(client.clone()),
            Api::<Secret>::all(client.clone()),
            Api::<PersistentVolumeClaim>::all(client.clone()),
        ),
    };

    if let Err(e) = pulp_api.list(&ListParams::default().limit(1)).await {
        error!("Pulp is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    // all resources we create have this label
    let cfg = Config::default().labels(PULP_CR_LABEL);

    let deploy_watcher = watcher(deploy_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate);

    let svc_watcher = watcher(svc_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        // svc has no generation so we hash the spec to check for changes
        .predicate_filter(changed_predicate.combine(spec_predicate_serde));

    let secret_watcher = watcher(secret_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate.combine(spec_predicate_serde));

    let pvc_watcher = watcher(pvc_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate.combine(spec_predicate_serde));

    Controller::new(pulp_api, Config::default())
        .shutdown_on_signal()
        .owns_stream(deploy_watcher)
        .owns_stream(svc_watcher)
        .owns_stream(secret_watcher)
        .owns_stream(pvc_watcher)
        .run(reconcile, error_policy, Context::new(client, metrics, state))
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

// deletion doesn't change the metadata the changed_predicate looks at, so bump the generation
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<kube::runtime::watcher::Event<K>, E>,
) -> Result<kube::runtime::watcher::Event<K>, E> {
    if let Ok(kube::runtime::watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = Some(meta.generation.map_or(0, |g| g + 1));
    }
    event
}

fn changed_predicate<K: Resource>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(g) = obj.meta().generation {
        // covers spec but not metadata or status
        g.hash(&mut hasher)
    }
    obj.labels().hash(&mut hasher);
    obj.annotations().hash(&mut hasher);
    Some(hasher.finish())
}

/// The part of an object without a generation that we hash to spot edits
pub trait MyHasSpec {
    type Spec;

    fn spec(&self) -> &Self::Spec;
}

impl MyHasSpec for Service {
    type Spec = Option<ServiceSpec>;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }
}

impl MyHasSpec for Secret {
    type Spec = Option<std::collections::BTreeMap<String, ByteString>>;

    fn spec(&self) -> &Self::Spec {
        &self.data
    }
}

impl MyHasSpec for PersistentVolumeClaim {
    type Spec = Option<PersistentVolumeClaimSpec>;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }
}

fn spec_predicate_serde<K: Resource + MyHasSpec>(obj: &K) -> Option<u64>
where
    K::Spec: Serialize,
{
    let mut hasher = DefaultHasher::new();
    // hashing fails only for floats, which none of these specs carry
    if let Ok(key) = serde_hashkey::to_key(obj.spec()) {
        key.hash(&mut hasher);
    }
    Some(hasher.finish())
}
