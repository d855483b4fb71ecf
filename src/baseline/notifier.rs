use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::AnomalyConfig;
use crate::error::Result;
use crate::models::AlertStatus;
use crate::store::{AlertFilter, TraceStore};

/// Drives the automatic parts of the alert state machine: dispatching
/// pending alerts to `sent`, and resolving non-terminal alerts older than
/// the expiry horizon.
///
/// Dispatch itself is a structured log line; a webhook/pager integration
/// attaches here without touching the state machine.
pub struct AlertNotifier {
    store: Arc<dyn TraceStore>,
    config: AnomalyConfig,
}

impl AlertNotifier {
    pub fn new(store: Arc<dyn TraceStore>, config: AnomalyConfig) -> Self {
        Self { store, config }
    }

    /// One dispatch + expiry pass; the loop body, public for tests
    pub async fn run_once(&self) -> Result<()> {
        self.dispatch_pending().await?;
        self.expire_stale().await?;
        Ok(())
    }

    async fn dispatch_pending(&self) -> Result<()> {
        let pending = self
            .store
            .list_alerts(&AlertFilter {
                statuses: vec![AlertStatus::Pending],
                limit: Some(500),
                ..Default::default()
            })
            .await?;

        for mut alert in pending {
            tracing::info!(
                alert_id = %alert.alert_id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                customer_id = %alert.customer_id,
                reasoning = %alert.reasoning,
                "Alert notification dispatched"
            );
            alert.transition(AlertStatus::Sent)?;
            self.store.update_alert(&alert).await?;
        }
        Ok(())
    }

    async fn expire_stale(&self) -> Result<()> {
        let cutoff = Utc::now() - Duration::hours(self.config.alert_expiry_hours as i64);
        let stale = self
            .store
            .list_alerts(&AlertFilter {
                statuses: vec![
                    AlertStatus::Pending,
                    AlertStatus::Sent,
                    AlertStatus::Acknowledged,
                ],
                created_before: Some(cutoff),
                limit: Some(500),
                ..Default::default()
            })
            .await?;

        for mut alert in stale {
            alert.transition(AlertStatus::Resolved)?;
            self.store.update_alert(&alert).await?;
            tracing::info!(alert_id = %alert.alert_id, "Alert auto-expired");
        }
        Ok(())
    }

    /// Periodic loop; spawned at startup
    pub async fn run(self: Arc<Self>, interval_secs: u64) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Alert notifier pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Alert, AlertSeverity, AlertType};
    use crate::store::InMemoryStore;

    fn alert() -> Alert {
        Alert::new(
            "t1".to_string(),
            "s1".to_string(),
            "cust-1".to_string(),
            "svc".to_string(),
            "/chat".to_string(),
            AlertType::CostSpike,
            AlertSeverity::High,
        )
    }

    #[tokio::test]
    async fn test_pending_alerts_are_dispatched() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = AlertNotifier::new(store.clone(), Config::default().anomaly);

        let a = alert();
        store.insert_alert(&a).await.unwrap();

        notifier.run_once().await.unwrap();

        let stored = store.get_alert(&a.alert_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Sent);
    }

    #[tokio::test]
    async fn test_stale_alerts_expire_to_resolved() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = AlertNotifier::new(store.clone(), Config::default().anomaly);

        let mut stale = alert();
        stale.created_at = Utc::now() - Duration::hours(25);
        store.insert_alert(&stale).await.unwrap();

        let fresh = alert();
        store.insert_alert(&fresh).await.unwrap();

        notifier.run_once().await.unwrap();

        let expired = store.get_alert(&stale.alert_id).await.unwrap().unwrap();
        assert_eq!(expired.status, AlertStatus::Resolved);
        assert!(expired.resolved_at.is_some());

        // The fresh alert only advanced to sent
        let live = store.get_alert(&fresh.alert_id).await.unwrap().unwrap();
        assert_eq!(live.status, AlertStatus::Sent);
    }
}
