use crate::resources::pulps::Pulp;
use crate::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub restarts: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "pulp_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "pulp_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "instance", "error"],
        )
        .unwrap();
        let reconciliations =
            IntCounter::new("pulp_operator_reconciliations_total", "reconciliations").unwrap();
        let restarts = IntCounterVec::new(
            opts!(
                "pulp_operator_workload_restarts_total",
                "rollouts triggered by a shared configuration change",
            ),
            &["instance"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            restarts,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.restarts.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, obj: &T, e: &Error) {
        self.failures
            .with_label_values(&[
                T::kind(&()).as_ref(),
                obj.name_any().as_ref(),
                e.metric_label(),
            ])
            .inc()
    }

    pub fn restart(&self, pulp: &Pulp) {
        self.restarts
            .with_label_values(&[pulp.name_any().as_str()])
            .inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }
}

/// Observes the reconcile duration when dropped
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::pulps::PulpSpec;

    #[test]
    fn restarts_are_counted_per_instance() {
        let registry = Registry::new();
        let metrics = Metrics::default().register(&registry).unwrap();
        let pulp = Pulp::new("example", PulpSpec::default());

        metrics.restart(&pulp);
        metrics.restart(&pulp);

        assert_eq!(metrics.restarts.with_label_values(&["example"]).get(), 2);
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "pulp_operator_workload_restarts_total"));
    }

    #[test]
    fn failures_are_labelled_by_error() {
        let metrics = Metrics::default();
        let pulp = Pulp::new("example", PulpSpec::default());

        metrics.reconcile_failure(&pulp, &Error::SecretNotFound("db".into()));

        assert_eq!(
            metrics
                .failures
                .with_label_values(&["Pulp", "example", "SecretNotFound"])
                .get(),
            1
        );
    }
}
