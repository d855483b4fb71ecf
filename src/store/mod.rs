pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::{
    Alert, AlertSeverity, AlertStatus, AlertType, BaselineWindow, CostBaseline, Environment, Span,
    SpanKey, SpanStatus,
};

/// Filter for span queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SpanFilter {
    pub customer_id: Option<String>,
    pub service_name: Option<String>,
    /// Prefix match
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub status: Option<SpanStatus>,
    pub environment: Option<Environment>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Filter for alert queries
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub customer_id: Option<String>,
    pub statuses: Vec<AlertStatus>,
    pub severities: Vec<AlertSeverity>,
    pub alert_types: Vec<AlertType>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Trait for span/alert/baseline storage operations.
///
/// Writes are commutative: the span upsert resolves `(trace_id, span_id)`
/// conflicts by overwriting only the mutable fields, and the baseline upsert
/// never moves `last_updated` backwards, so replays and re-deliveries from
/// the at-least-once queue converge.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Insert a span, or on `(trace_id, span_id)` conflict update only
    /// `timestamp`, `latency_ms`, and `status`.
    async fn upsert_span(&self, span: &Span) -> Result<()>;

    /// Get one span by its composite key
    async fn get_span(&self, key: &SpanKey) -> Result<Option<Span>>;

    /// List spans matching a filter, newest first
    async fn list_spans(&self, filter: &SpanFilter, limit: u32, offset: u32) -> Result<Vec<Span>>;

    /// Count spans matching a filter
    async fn count_spans(&self, filter: &SpanFilter) -> Result<u64>;

    /// All spans of one trace, in no particular order
    async fn get_trace_spans(&self, trace_id: &str) -> Result<Vec<Span>>;

    /// All spans of a set of traces (replay-engine fetch path)
    async fn get_traces_spans(&self, trace_ids: &[String]) -> Result<Vec<Span>>;

    /// Delete spans older than the cutoff; dependent alert and replay rows
    /// go with them. Returns the number of spans removed.
    async fn delete_spans_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Insert a new alert row
    async fn insert_alert(&self, alert: &Alert) -> Result<()>;

    /// Get an alert by ID
    async fn get_alert(&self, alert_id: &Uuid) -> Result<Option<Alert>>;

    /// Persist alert mutations (status stamps, suppressed_count)
    async fn update_alert(&self, alert: &Alert) -> Result<()>;

    /// List alerts matching a filter, newest first
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    /// Most recent open (pending/sent) alert for the dedup scope, at or
    /// after `since`. Store-side fallback for the in-memory dedup index.
    async fn find_recent_alert(
        &self,
        customer_id: &str,
        service_name: &str,
        endpoint: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>>;

    /// Upsert a baseline row; `last_updated` is monotonic per key
    async fn upsert_baseline(&self, baseline: &CostBaseline) -> Result<()>;

    /// Get the baseline for one (service, endpoint, window)
    async fn get_baseline(
        &self,
        service_name: &str,
        endpoint: &str,
        window: BaselineWindow,
    ) -> Result<Option<CostBaseline>>;

    /// Drop baseline rows idle since before the cutoff
    async fn delete_idle_baselines(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Resolve an API key to a customer ID, if registered
    async fn lookup_customer(&self, api_key: &str) -> Result<Option<String>>;

    /// Liveness probe for health checks
    async fn ping(&self) -> Result<()>;
}

/// Create a store from configuration: `sqlite:` URLs get the relational
/// backend, the `memory:` scheme the dashmap one (tests, MVP runs).
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn TraceStore>> {
    if config.url == "memory:" {
        tracing::info!("Using in-memory trace store");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let store = SqliteStore::connect(&config.url, config.pool_size).await?;
    tracing::info!(url = %config.url, pool_size = config.pool_size, "Connected to trace store");
    Ok(Arc::new(store))
}
