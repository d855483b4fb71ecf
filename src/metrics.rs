//! Prometheus metrics for the trace observability core.
//!
//! Exposed at `GET /metrics` on the query server in text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "llm_trace_observatory";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Spans accepted by the receiver and handed to the queue
    pub static ref INGEST_ACCEPTED_TOTAL: Counter = Counter::with_opts(
        Opts::new("ingest_accepted_total", "Spans accepted by the receiver")
            .namespace(NAMESPACE)
    ).expect("Failed to create INGEST_ACCEPTED_TOTAL metric");

    /// Spans rejected by the receiver, by rejection code
    pub static ref INGEST_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("ingest_rejected_total", "Spans rejected by the receiver")
            .namespace(NAMESPACE),
        &["code"]
    ).expect("Failed to create INGEST_REJECTED_TOTAL metric");

    /// Batches currently queued between receiver and workers
    pub static ref QUEUE_DEPTH: Gauge = Gauge::with_opts(
        Opts::new("queue_depth", "Batches queued between receiver and workers")
            .namespace(NAMESPACE)
    ).expect("Failed to create QUEUE_DEPTH metric");

    /// Publishes refused past the high-water mark
    pub static ref QUEUE_BACKPRESSURE_TOTAL: Counter = Counter::with_opts(
        Opts::new("queue_backpressure_total", "Publishes refused with backpressure")
            .namespace(NAMESPACE)
    ).expect("Failed to create QUEUE_BACKPRESSURE_TOTAL metric");

    /// Batches moved to the dead-letter sink
    pub static ref QUEUE_DEAD_LETTERED_TOTAL: Counter = Counter::with_opts(
        Opts::new("queue_dead_lettered_total", "Batches moved to the dead-letter sink")
            .namespace(NAMESPACE)
    ).expect("Failed to create QUEUE_DEAD_LETTERED_TOTAL metric");

    /// Spans fully processed by the worker pipeline
    pub static ref SPANS_PROCESSED_TOTAL: Counter = Counter::with_opts(
        Opts::new("spans_processed_total", "Spans fully processed by workers")
            .namespace(NAMESPACE)
    ).expect("Failed to create SPANS_PROCESSED_TOTAL metric");

    /// Spans per processed batch
    pub static ref BATCH_SPANS: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_spans", "Spans per processed batch")
            .namespace(NAMESPACE)
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0])
    ).expect("Failed to create BATCH_SPANS metric");

    /// Store upsert latency in seconds (AIMD input)
    pub static ref STORE_WRITE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("store_write_seconds", "Span upsert latency")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5])
    ).expect("Failed to create STORE_WRITE_SECONDS metric");

    /// Alerts emitted, by type and severity
    pub static ref ALERTS_EMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("alerts_emitted_total", "Alerts emitted by the anomaly engine")
            .namespace(NAMESPACE),
        &["alert_type", "severity"]
    ).expect("Failed to create ALERTS_EMITTED_TOTAL metric");

    /// Duplicate alerts suppressed within the dedup window
    pub static ref ALERTS_SUPPRESSED_TOTAL: Counter = Counter::with_opts(
        Opts::new("alerts_suppressed_total", "Duplicate alerts suppressed")
            .namespace(NAMESPACE)
    ).expect("Failed to create ALERTS_SUPPRESSED_TOTAL metric");

    /// Spans removed by the retention sweep
    pub static ref RETENTION_DELETED_TOTAL: Counter = Counter::with_opts(
        Opts::new("retention_deleted_total", "Spans removed by the retention sweep")
            .namespace(NAMESPACE)
    ).expect("Failed to create RETENTION_DELETED_TOTAL metric");
}

/// Register every metric with the global registry. Idempotent enough for
/// tests: re-registration errors are reported once and otherwise ignored.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(INGEST_ACCEPTED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(INGEST_REJECTED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(QUEUE_BACKPRESSURE_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(QUEUE_DEAD_LETTERED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SPANS_PROCESSED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BATCH_SPANS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(STORE_WRITE_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ALERTS_EMITTED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ALERTS_SUPPRESSED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(RETENTION_DELETED_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = PROMETHEUS_REGISTRY.gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_and_gather() {
        let _ = init_metrics();

        INGEST_ACCEPTED_TOTAL.inc_by(3.0);
        INGEST_REJECTED_TOTAL.with_label_values(&["INVALID_FIELD"]).inc();
        STORE_WRITE_SECONDS.observe(0.004);

        let output = gather_metrics();
        assert!(output.contains("llm_trace_observatory_ingest_accepted_total"));
        assert!(output.contains("llm_trace_observatory_queue_depth"));
        assert!(output.contains("code=\"INVALID_FIELD\""));
    }
}
