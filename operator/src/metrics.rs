use crate::Error;
use prometheus::{histogram_opts, opts, HistogramTimer, HistogramVec, IntCounterVec};

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "codeserver_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
                vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]
            ),
            &["controller"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!("codeserver_operator_reconciliation_errors_total", "reconciliation errors"),
            &["controller", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!("codeserver_operator_reconciliations_total", "reconciliations"),
            &["controller"],
        )
        .unwrap();
        let registry = prometheus::default_registry();
        registry.register(Box::new(reconcile_duration.clone())).unwrap();
        registry.register(Box::new(failures.clone())).unwrap();
        registry.register(Box::new(reconciliations.clone())).unwrap();
        Self {
            reconciliations,
            failures,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Counts a run and returns a timer observing the reconcile duration on drop
    pub fn count_and_measure(&self, controller: &str) -> HistogramTimer {
        self.reconciliations.with_label_values(&[controller]).inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .start_timer()
    }

    pub fn reconcile_failure(&self, controller: &str, instance: &str, e: &Error) {
        self.failures
            .with_label_values(&[controller, instance, e.metric_label().as_str()])
            .inc();
    }
}
