//! Prometheus metrics for the control loop.
//!
//! Every key acknowledged without converging (permanent failure, retries
//! exhausted, malformed notification) is counted in `ekpose_dropped_total`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Handles to every metric the controller records.
///
/// Cloning is cheap; all clones update the same series.
#[derive(Clone)]
pub struct Metrics {
    /// Watch notifications by event type
    pub events_total: IntCounterVec,
    /// Keys submitted to the work queue
    pub enqueued_total: IntCounter,
    /// Reconcile attempts by outcome
    pub reconcile_total: IntCounterVec,
    /// Reconcile latency
    pub reconcile_duration_seconds: Histogram,
    /// Retries scheduled with backoff
    pub retries_total: IntCounter,
    /// Keys acknowledged without converging, by reason
    pub dropped_total: IntCounterVec,
    /// Keys waiting in the queue
    pub queue_depth: IntGauge,
    /// 1 once the Deployment cache holds a complete snapshot
    pub cache_synced: IntGauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register all metrics in `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_total = IntCounterVec::new(
            Opts::new("ekpose_events_total", "Deployment watch notifications"),
            &["event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let enqueued_total =
            IntCounter::new("ekpose_enqueued_total", "Keys submitted to the work queue")?;
        registry.register(Box::new(enqueued_total.clone()))?;

        let reconcile_total = IntCounterVec::new(
            Opts::new("ekpose_reconcile_total", "Reconcile attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let reconcile_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("ekpose_reconcile_duration_seconds", "Reconcile latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        let retries_total = IntCounter::new("ekpose_retries_total", "Retries scheduled with backoff")?;
        registry.register(Box::new(retries_total.clone()))?;

        let dropped_total = IntCounterVec::new(
            Opts::new("ekpose_dropped_total", "Keys acknowledged without converging"),
            &["reason"],
        )?;
        registry.register(Box::new(dropped_total.clone()))?;

        let queue_depth = IntGauge::new("ekpose_queue_depth", "Keys waiting in the work queue")?;
        registry.register(Box::new(queue_depth.clone()))?;

        let cache_synced = IntGauge::new("ekpose_cache_synced", "Deployment cache has synced")?;
        registry.register(Box::new(cache_synced.clone()))?;

        Ok(Self {
            events_total,
            enqueued_total,
            reconcile_total,
            reconcile_duration_seconds,
            retries_total,
            dropped_total,
            queue_depth,
            cache_synced,
        })
    }

    /// Metrics registered in a private registry, for tests and tools that do
    /// not export them.
    #[cfg(test)]
    pub fn unregistered() -> Self {
        match Self::new(&Registry::new()) {
            Ok(metrics) => metrics,
            Err(e) => panic!("metric definitions are invalid: {e}"),
        }
    }
}

/// Render `registry` in the Prometheus text exposition format.
pub fn export_metrics(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_metrics() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.enqueued_total.inc();
        metrics.dropped_total.with_label_values(&["permanent"]).inc();

        let output = export_metrics(&registry).unwrap();
        assert!(output.contains("ekpose_enqueued_total 1"));
        assert!(output.contains("ekpose_dropped_total{reason=\"permanent\"} 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new(&registry).unwrap();
        assert!(Metrics::new(&registry).is_err());
    }
}
