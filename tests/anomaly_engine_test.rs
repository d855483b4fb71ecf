//! Baseline-driven anomaly scenarios through the full pipeline.
//!
//! Baselines are recomputed explicitly after seeding, standing in for the
//! periodic tick the server runs.

mod common;

use common::{default_harness, span_json, Harness};
use llm_trace_observatory::config::Config;
use llm_trace_observatory::models::{AlertSeverity, AlertStatus, AlertType};
use llm_trace_observatory::store::{AlertFilter, TraceStore};

/// Seed fifty $0.001 spans and publish the baseline: 24h P95 cost $0.001
async fn seed_baseline(harness: &Harness) {
    let traces: Vec<_> = (0..50)
        .map(|i| {
            let mut span = span_json("t-seed", &format!("s{}", i));
            span["cost_usd"] = serde_json::json!(0.001);
            span["latency_ms"] = serde_json::json!(100.0);
            span
        })
        .collect();
    let outcome = harness.ingest("cust-1", traces).await;
    assert!(outcome.success);

    harness
        .baselines
        .recompute_partition("svc", "/chat")
        .await
        .unwrap();
}

fn spike(trace_id: &str) -> serde_json::Value {
    let mut span = span_json(trace_id, "s1");
    span["cost_usd"] = serde_json::json!(0.010);
    span["latency_ms"] = serde_json::json!(100.0);
    span
}

#[tokio::test]
async fn test_cost_spike_emits_high_severity_alert() {
    let harness = default_harness();
    seed_baseline(&harness).await;

    harness.ingest("cust-1", vec![spike("t-spike")]).await;

    let alerts = harness
        .store
        .list_alerts(&AlertFilter {
            alert_types: vec![AlertType::CostSpike],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.severity, AlertSeverity::High);
    assert_eq!(alert.trace_id, "t-spike");
    assert!((alert.current_cost - 0.010).abs() < 1e-9);
    assert!((alert.baseline_cost - 0.001).abs() < 1e-9);
    assert!((alert.cost_increase_percent - 900.0).abs() < 1.0);
    assert_eq!(alert.status, AlertStatus::Pending);
}

#[tokio::test]
async fn test_duplicate_spikes_suppressed_within_minute() {
    let harness = default_harness();
    seed_baseline(&harness).await;

    for i in 0..3 {
        harness
            .ingest("cust-1", vec![spike(&format!("t-spike-{}", i))])
            .await;
    }

    let alerts = harness
        .store
        .list_alerts(&AlertFilter {
            alert_types: vec![AlertType::CostSpike],
            ..Default::default()
        })
        .await
        .unwrap();

    // One row; the two duplicates were suppressed onto it
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].suppressed_count, 2);
}

#[tokio::test]
async fn test_new_alert_after_dedup_window_expires() {
    let mut config = Config::default();
    config.anomaly.dedup_window_secs = 1;
    let harness = Harness::new(config);
    seed_baseline(&harness).await;

    harness.ingest("cust-1", vec![spike("t-spike-a")]).await;

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    harness.ingest("cust-1", vec![spike("t-spike-b")]).await;

    let alerts = harness
        .store
        .list_alerts(&AlertFilter {
            alert_types: vec![AlertType::CostSpike],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alerts.len(), 2);
}

#[tokio::test]
async fn test_latency_spike_detected() {
    let harness = default_harness();
    seed_baseline(&harness).await;

    let mut slow = span_json("t-slow", "s1");
    slow["latency_ms"] = serde_json::json!(1000.0);
    slow["cost_usd"] = serde_json::json!(0.001); // cost stays normal
    harness.ingest("cust-1", vec![slow]).await;

    let alerts = harness
        .store
        .list_alerts(&AlertFilter::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::LatencySpike);
    // 10x the latency baseline: HIGH
    assert_eq!(alerts[0].severity, AlertSeverity::High);
}

#[tokio::test]
async fn test_normal_traffic_stays_quiet() {
    let harness = default_harness();
    seed_baseline(&harness).await;

    let mut normal = span_json("t-normal", "s1");
    normal["cost_usd"] = serde_json::json!(0.0015);
    normal["latency_ms"] = serde_json::json!(120.0);
    harness.ingest("cust-1", vec![normal]).await;

    let alerts = harness
        .store
        .list_alerts(&AlertFilter::default())
        .await
        .unwrap();
    assert!(alerts.is_empty());
}
