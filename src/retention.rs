use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::models::BaselineWindow;
use crate::store::TraceStore;

/// Periodic retention sweep: spans older than the retention horizon are
/// deleted (alerts and replay rows cascade), and baseline rows idle past the
/// widest window are garbage-collected on the same pass.
pub struct RetentionSweeper {
    store: Arc<dyn TraceStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn TraceStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// One sweep pass; runs at boot and on every tick
    pub async fn run_once(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(self.config.days as i64);
        let deleted = self.store.delete_spans_before(cutoff).await?;

        let baseline_cutoff = Utc::now() - BaselineWindow::widest().duration();
        let baselines = self.store.delete_idle_baselines(baseline_cutoff).await?;

        if deleted > 0 || baselines > 0 {
            tracing::info!(
                spans_deleted = deleted,
                baselines_deleted = baselines,
                retention_days = self.config.days,
                "Retention sweep completed"
            );
        }
        crate::metrics::RETENTION_DELETED_TOTAL.inc_by(deleted as f64);
        Ok(deleted)
    }

    /// Sweep loop; spawned at startup
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.sweep_interval_secs.max(1),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Retention sweep failed");
            }
        }
    }
}
