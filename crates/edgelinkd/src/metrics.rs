//! Prometheus metrics for the ingestion pipeline

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Outcome label values
pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_TIMEOUT: &str = "timeout";
pub const OUTCOME_ERROR: &str = "error";

/// Pipeline metrics for Prometheus
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Poll attempts by device and outcome (ok | timeout | error)
    pub polls_total: IntCounterVec,
    /// Publish attempts by device and outcome (ok | error)
    pub publish_total: IntCounterVec,
    pub poll_duration_seconds: HistogramVec,
    pub devices_cached: IntGauge,

    registry: Arc<Registry>,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_total = register_int_counter_vec_with_registry!(
            "edgelink_polls_total",
            "Total number of device polls by device and outcome",
            &["device", "outcome"],
            registry
        )?;

        let publish_total = register_int_counter_vec_with_registry!(
            "edgelink_publish_total",
            "Total number of publish attempts by device and outcome",
            &["device", "outcome"],
            registry
        )?;

        let poll_duration_seconds = register_histogram_vec_with_registry!(
            "edgelink_poll_duration_seconds",
            "Time spent in a single device poll",
            &["device"],
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            registry
        )?;

        let devices_cached = register_int_gauge_with_registry!(
            "edgelink_devices_cached",
            "Number of devices with a cached reading",
            registry
        )?;

        Ok(Self {
            polls_total,
            publish_total,
            poll_duration_seconds,
            devices_cached,
            registry: Arc::new(registry),
        })
    }

    /// Record one poll attempt
    pub fn record_poll(&self, device: &str, outcome: &str, elapsed: Duration) {
        self.polls_total
            .with_label_values(&[device, outcome])
            .inc();
        self.poll_duration_seconds
            .with_label_values(&[device])
            .observe(elapsed.as_secs_f64());
    }

    /// Record one publish attempt
    pub fn record_publish(&self, device: &str, ok: bool) {
        let outcome = if ok { OUTCOME_OK } else { OUTCOME_ERROR };
        self.publish_total
            .with_label_values(&[device, outcome])
            .inc();
    }

    pub fn set_devices_cached(&self, count: usize) {
        self.devices_cached.set(count as i64);
    }

    pub fn poll_count(&self, device: &str, outcome: &str) -> u64 {
        self.polls_total
            .with_label_values(&[device, outcome])
            .get()
    }

    pub fn publish_count(&self, device: &str, ok: bool) -> u64 {
        let outcome = if ok { OUTCOME_OK } else { OUTCOME_ERROR };
        self.publish_total
            .with_label_values(&[device, outcome])
            .get()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_export() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_poll("press-1", OUTCOME_OK, Duration::from_millis(3));
        metrics.record_poll("press-1", OUTCOME_TIMEOUT, Duration::from_millis(500));
        metrics.record_publish("press-1", true);
        metrics.record_publish("press-1", false);
        metrics.set_devices_cached(1);

        assert_eq!(metrics.poll_count("press-1", OUTCOME_OK), 1);
        assert_eq!(metrics.poll_count("press-1", OUTCOME_TIMEOUT), 1);
        assert_eq!(metrics.publish_count("press-1", false), 1);

        let text = metrics.export().unwrap();
        assert!(text.contains("edgelink_polls_total{device=\"press-1\",outcome=\"ok\"} 1"));
        assert!(text.contains("edgelink_devices_cached 1"));
        assert!(text.contains("edgelink_poll_duration_seconds_bucket"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PipelineMetrics::new().unwrap();
        let b = PipelineMetrics::new().unwrap();
        a.record_publish("x", true);
        assert_eq!(b.publish_count("x", true), 0);
    }
}
