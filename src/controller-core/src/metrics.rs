use crate::{Error, Result};
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use std::time::Instant;

/// Reconciler and pod transition metrics, shared by every controller in the process.
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub transitions: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "podpause_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["controller"],
        )
        .expect("static histogram options are valid");
        let failures = IntCounterVec::new(
            opts!(
                "podpause_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["instance", "error"],
        )
        .expect("static counter options are valid");
        let reconciliations = IntCounterVec::new(
            opts!("podpause_reconciliations_total", "reconciliations"),
            &["controller"],
        )
        .expect("static counter options are valid");
        let transitions = IntCounterVec::new(
            opts!(
                "podpause_pod_transitions_total",
                "pause and resume actions applied to pods",
            ),
            &["action", "outcome"],
        )
        .expect("static counter options are valid");
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            transitions,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self> {
        registry
            .register(Box::new(self.reconcile_duration.clone()))
            .map_err(Error::MetricsError)?;
        registry
            .register(Box::new(self.failures.clone()))
            .map_err(Error::MetricsError)?;
        registry
            .register(Box::new(self.reconciliations.clone()))
            .map_err(Error::MetricsError)?;
        registry
            .register(Box::new(self.transitions.clone()))
            .map_err(Error::MetricsError)?;
        Ok(self)
    }

    pub fn reconcile_failure<K: ResourceExt>(&self, obj: &K, e: &Error) {
        self.failures
            .with_label_values(&[obj.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn transition(&self, action: &str, outcome: &str) {
        self.transitions.with_label_values(&[action, outcome]).inc()
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.reconciliations.with_label_values(&[controller]).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            controller: controller.to_string(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    controller: String,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.controller.as_str()])
            .observe(duration);
    }
}
