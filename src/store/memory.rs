use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Alert, AlertStatus, AlertType, BaselineWindow, CostBaseline, Span, SpanKey,
};
use crate::store::{AlertFilter, SpanFilter, TraceStore};

/// In-memory trace store (for MVP runs and testing).
///
/// Mirrors the relational backend's semantics, including the restricted-field
/// upsert and cascade on retention deletes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    spans: Arc<DashMap<SpanKey, Span>>,
    alerts: Arc<DashMap<Uuid, Alert>>,
    baselines: Arc<DashMap<(String, String, BaselineWindow), CostBaseline>>,
    api_keys: Arc<DashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an API key → customer mapping (test harness hook)
    pub fn register_api_key(&self, api_key: &str, customer_id: &str) {
        self.api_keys
            .insert(api_key.to_string(), customer_id.to_string());
    }

    fn matches(span: &Span, filter: &SpanFilter) -> bool {
        if let Some(ref customer) = filter.customer_id {
            if span.customer_id != *customer {
                return false;
            }
        }
        if let Some(ref service) = filter.service_name {
            if span.service_name != *service {
                return false;
            }
        }
        if let Some(ref endpoint) = filter.endpoint {
            if !span.endpoint.starts_with(endpoint.as_str()) {
                return false;
            }
        }
        if let Some(ref model) = filter.model {
            if span.model != *model {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if span.status != status {
                return false;
            }
        }
        if let Some(environment) = filter.environment {
            if span.environment != environment {
                return false;
            }
        }
        if let Some(start) = filter.start_time {
            if span.timestamp < start {
                return false;
            }
        }
        if let Some(end) = filter.end_time {
            if span.timestamp > end {
                return false;
            }
        }
        true
    }

    fn alert_matches(alert: &Alert, filter: &AlertFilter) -> bool {
        if let Some(ref customer) = filter.customer_id {
            if alert.customer_id != *customer {
                return false;
            }
        }
        if !filter.statuses.is_empty() && !filter.statuses.contains(&alert.status) {
            return false;
        }
        if !filter.severities.is_empty() && !filter.severities.contains(&alert.severity) {
            return false;
        }
        if !filter.alert_types.is_empty() && !filter.alert_types.contains(&alert.alert_type) {
            return false;
        }
        if let Some(before) = filter.created_before {
            if alert.created_at >= before {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl TraceStore for InMemoryStore {
    async fn upsert_span(&self, span: &Span) -> Result<()> {
        match self.spans.entry(span.key()) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                // Conflict policy: late corrections touch only these fields
                let stored = existing.get_mut();
                stored.timestamp = span.timestamp;
                stored.latency_ms = span.latency_ms;
                stored.status = span.status;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(span.clone());
            }
        }
        Ok(())
    }

    async fn get_span(&self, key: &SpanKey) -> Result<Option<Span>> {
        Ok(self.spans.get(key).map(|entry| entry.clone()))
    }

    async fn list_spans(&self, filter: &SpanFilter, limit: u32, offset: u32) -> Result<Vec<Span>> {
        let mut spans: Vec<Span> = self
            .spans
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();

        spans.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(spans
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_spans(&self, filter: &SpanFilter) -> Result<u64> {
        Ok(self
            .spans
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .count() as u64)
    }

    async fn get_trace_spans(&self, trace_id: &str) -> Result<Vec<Span>> {
        Ok(self
            .spans
            .iter()
            .filter(|entry| entry.value().trace_id == trace_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_traces_spans(&self, trace_ids: &[String]) -> Result<Vec<Span>> {
        Ok(self
            .spans
            .iter()
            .filter(|entry| trace_ids.iter().any(|t| *t == entry.value().trace_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_spans_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let doomed: Vec<SpanKey> = self
            .spans
            .iter()
            .filter(|entry| entry.value().timestamp < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &doomed {
            self.spans.remove(key);
        }

        // Manual cascade; the relational backend does this via foreign keys
        self.alerts.retain(|_, alert| {
            !doomed
                .iter()
                .any(|k| k.trace_id == alert.trace_id && k.span_id == alert.span_id)
        });

        Ok(doomed.len() as u64)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, alert_id: &Uuid) -> Result<Option<Alert>> {
        Ok(self.alerts.get(alert_id).map(|entry| entry.clone()))
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        if self.alerts.contains_key(&alert.alert_id) {
            self.alerts.insert(alert.alert_id, alert.clone());
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Alert {} not found",
                alert.alert_id
            )))
        }
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|entry| Self::alert_matches(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();

        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            alerts.truncate(limit as usize);
        }
        Ok(alerts)
    }

    async fn find_recent_alert(
        &self,
        customer_id: &str,
        service_name: &str,
        endpoint: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .iter()
            .filter(|entry| {
                let alert = entry.value();
                alert.customer_id == customer_id
                    && alert.service_name == service_name
                    && alert.endpoint == endpoint
                    && alert.alert_type == alert_type
                    && alert.created_at >= since
                    && matches!(alert.status, AlertStatus::Pending | AlertStatus::Sent)
            })
            .map(|entry| entry.value().clone())
            .max_by_key(|alert| alert.created_at))
    }

    async fn upsert_baseline(&self, baseline: &CostBaseline) -> Result<()> {
        let key = baseline.key();
        match self.baselines.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                // last_updated never moves backwards
                if baseline.last_updated >= existing.get().last_updated {
                    existing.insert(baseline.clone());
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(baseline.clone());
            }
        }
        Ok(())
    }

    async fn get_baseline(
        &self,
        service_name: &str,
        endpoint: &str,
        window: BaselineWindow,
    ) -> Result<Option<CostBaseline>> {
        let key = (service_name.to_string(), endpoint.to_string(), window);
        Ok(self.baselines.get(&key).map(|entry| entry.clone()))
    }

    async fn delete_idle_baselines(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.baselines.len();
        self.baselines
            .retain(|_, baseline| baseline.last_updated >= cutoff);
        Ok((before - self.baselines.len()) as u64)
    }

    async fn lookup_customer(&self, api_key: &str) -> Result<Option<String>> {
        Ok(self.api_keys.get(api_key).map(|entry| entry.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
