use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

use crate::config::BaselineConfig;
use crate::error::Result;
use crate::models::{BaselineWindow, CostBaseline, Span};
use crate::store::TraceStore;

use super::buffer::{BaselineBuffers, Sample};

/// Maintains rolling cost/latency percentiles per (service, endpoint, window).
///
/// Samples accumulate in the partitioned buffers; percentiles are recomputed
/// when a partition gains `update_delta` new samples or on the periodic tick,
/// whichever comes first. Recomputed rows are upserted to the store and
/// mirrored in an in-memory cache the anomaly detector reads from.
pub struct BaselineEngine {
    store: Arc<dyn TraceStore>,
    buffers: BaselineBuffers,
    latest: DashMap<(String, String, BaselineWindow), CostBaseline>,
    config: BaselineConfig,
}

impl BaselineEngine {
    pub fn new(store: Arc<dyn TraceStore>, config: BaselineConfig) -> Self {
        Self {
            store,
            buffers: BaselineBuffers::new(config.buffer_capacity),
            latest: DashMap::new(),
            config,
        }
    }

    /// Accumulate one span's cost/latency sample. Triggers a recompute for
    /// the partition when the update delta is reached.
    pub async fn record_span(&self, span: &Span) -> Result<()> {
        let delta = self.buffers.record(
            &span.service_name,
            &span.endpoint,
            Sample {
                at: span.timestamp,
                cost_usd: span.cost_usd,
                latency_ms: span.latency_ms,
            },
        );

        if delta >= self.config.update_delta {
            self.recompute_partition(&span.service_name, &span.endpoint)
                .await?;
        }
        Ok(())
    }

    /// Current baseline for a key: in-memory first, store on miss (covers
    /// process restarts, where buffers are cold but rows persist).
    pub async fn current(
        &self,
        service_name: &str,
        endpoint: &str,
        window: BaselineWindow,
    ) -> Result<Option<CostBaseline>> {
        let key = (service_name.to_string(), endpoint.to_string(), window);
        if let Some(cached) = self.latest.get(&key) {
            return Ok(Some(cached.clone()));
        }

        let stored = self.store.get_baseline(service_name, endpoint, window).await?;
        if let Some(ref baseline) = stored {
            self.latest.insert(key, baseline.clone());
        }
        Ok(stored)
    }

    /// Recompute all windows of one partition and upsert non-empty ones
    pub async fn recompute_partition(&self, service_name: &str, endpoint: &str) -> Result<()> {
        let now = Utc::now();

        for window in BaselineWindow::ALL {
            let samples = self.buffers.snapshot(service_name, endpoint, window, now);
            if samples.is_empty() {
                // Empty window: record skipped
                continue;
            }

            let mut costs: Vec<f64> = samples.iter().map(|s| s.cost_usd).collect();
            let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
            costs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let baseline = CostBaseline {
                service_name: service_name.to_string(),
                endpoint: endpoint.to_string(),
                window,
                p50_cost: nearest_rank(&costs, 50.0),
                p95_cost: nearest_rank(&costs, 95.0),
                p99_cost: nearest_rank(&costs, 99.0),
                p50_latency: nearest_rank(&latencies, 50.0),
                p95_latency: nearest_rank(&latencies, 95.0),
                p99_latency: nearest_rank(&latencies, 99.0),
                sample_count: samples.len() as u64,
                last_updated: now,
            };

            self.store.upsert_baseline(&baseline).await?;
            self.latest.insert(
                (service_name.to_string(), endpoint.to_string(), window),
                baseline,
            );
        }

        self.buffers.reset_delta(service_name, endpoint);
        Ok(())
    }

    /// One periodic pass over every partition (the update_period tick body)
    pub async fn recompute_all(&self) {
        for (service_name, endpoint) in self.buffers.keys() {
            if let Err(e) = self.recompute_partition(&service_name, &endpoint).await {
                tracing::error!(
                    service_name = %service_name,
                    endpoint = %endpoint,
                    error = %e,
                    "Baseline recompute failed"
                );
            }
        }
    }

    /// Periodic recompute loop; spawned at startup
    pub async fn run_ticker(self: Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.update_period_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.recompute_all().await;
        }
    }
}

/// Nearest-rank percentile over sorted data
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
