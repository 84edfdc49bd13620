//! Prometheus metrics for reconcile passes

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Counters and latencies of reconcile passes, labelled by kind
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Passes by kind and outcome (converged, deleted, requeued, error)
    pub reconciliations_total: IntCounterVec,
    /// Failed passes by kind
    pub reconcile_errors_total: IntCounterVec,
    /// Pass duration in seconds
    pub reconcile_duration_seconds: HistogramVec,
    pub registry: Arc<Registry>,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconciliations_total = IntCounterVec::new(
            Opts::new("reconciliations_total", "Total reconcile passes"),
            &["kind", "outcome"],
        )?;

        let reconcile_errors_total = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "Total failed reconcile passes"),
            &["kind"],
        )?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Reconcile pass latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["kind"],
        )?;

        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            reconciliations_total,
            reconcile_errors_total,
            reconcile_duration_seconds,
            registry,
        })
    }

    /// Record a finished pass. `outcome` is an [`Outcome`](crate::Outcome)
    /// label or `"error"`.
    pub fn observe(&self, kind: &str, outcome: &str, elapsed: Duration) {
        self.reconciliations_total
            .with_label_values(&[kind, outcome])
            .inc();
        if outcome == "error" {
            self.reconcile_errors_total.with_label_values(&[kind]).inc();
        }
        self.reconcile_duration_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_gather() {
        let metrics = ReconcileMetrics::new().unwrap();
        metrics.observe("KVCachePool", "converged", Duration::from_millis(3));
        metrics.observe("KVCachePool", "error", Duration::from_millis(8));

        assert_eq!(
            metrics
                .reconciliations_total
                .with_label_values(&["KVCachePool", "converged"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .reconcile_errors_total
                .with_label_values(&["KVCachePool"])
                .get(),
            1
        );

        let text = metrics.gather().unwrap();
        assert!(text.contains("reconciliations_total"));
        assert!(text.contains("reconcile_duration_seconds_bucket"));
    }
}
