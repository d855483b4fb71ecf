pub mod analytics;
pub mod tree;

pub use analytics::{
    BreakdownDimension, BreakdownRow, Granularity, PercentileReport, SummaryReport,
    TimelineBucket,
};
pub use tree::{build_trace_tree, SpanNode};

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::models::Span;
use crate::store::{SpanFilter, TraceStore};

/// Hard cap on page size
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Default row cap for breakdown aggregation
pub const DEFAULT_BREAKDOWN_LIMIT: usize = 50;

/// Rows fetched for one in-process aggregation pass
const ANALYTICS_FETCH_CAP: u32 = 100_000;

/// Read-side operations: filtered span queries, trace-tree reconstruction,
/// and aggregated analytics. Observes the store at whatever point in time
/// it provides; no cross-query snapshot.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn TraceStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }

    /// Filtered, paginated span listing, newest first. Returns the page and
    /// the unpaginated total.
    pub async fn list_spans(
        &self,
        filter: &SpanFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Span>, u64)> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let spans = self.store.list_spans(filter, limit, offset).await?;
        let total = self.store.count_spans(filter).await?;
        Ok((spans, total))
    }

    /// Reconstruct one trace's hierarchy. None when the trace has no spans
    /// visible to the customer.
    pub async fn get_trace(
        &self,
        customer_id: Option<&str>,
        trace_id: &str,
    ) -> Result<Option<SpanNode>> {
        let mut spans = self.store.get_trace_spans(trace_id).await?;
        if let Some(customer) = customer_id {
            spans.retain(|s| s.customer_id == customer);
        }
        Ok(build_trace_tree(spans))
    }

    /// Batch tree fetch; the replay engine's read path
    pub async fn get_traces_by_ids(
        &self,
        customer_id: Option<&str>,
        trace_ids: &[String],
    ) -> Result<Vec<SpanNode>> {
        let mut spans = self.store.get_traces_spans(trace_ids).await?;
        if let Some(customer) = customer_id {
            spans.retain(|s| s.customer_id == customer);
        }

        let mut by_trace: std::collections::HashMap<String, Vec<Span>> =
            std::collections::HashMap::new();
        for span in spans {
            by_trace.entry(span.trace_id.clone()).or_default().push(span);
        }

        // Preserve the requested order
        Ok(trace_ids
            .iter()
            .filter_map(|trace_id| by_trace.remove(trace_id).and_then(build_trace_tree))
            .collect())
    }

    pub async fn timeline(
        &self,
        customer_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<TimelineBucket>> {
        let spans = self.fetch_range(customer_id, start, end).await?;
        Ok(analytics::timeline(&spans, start, end, granularity))
    }

    pub async fn breakdown(
        &self,
        customer_id: &str,
        dimension: BreakdownDimension,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BreakdownRow>> {
        let spans = self.fetch_range(customer_id, start, end).await?;
        Ok(analytics::breakdown(&spans, dimension, limit))
    }

    pub async fn percentiles(
        &self,
        customer_id: &str,
        service_name: Option<String>,
        endpoint: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PercentileReport> {
        let filter = SpanFilter {
            customer_id: Some(customer_id.to_string()),
            service_name,
            endpoint,
            start_time: Some(start),
            end_time: Some(end),
            ..Default::default()
        };
        let spans = self.store.list_spans(&filter, ANALYTICS_FETCH_CAP, 0).await?;
        Ok(analytics::percentiles(&spans))
    }

    pub async fn summary(
        &self,
        customer_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SummaryReport> {
        let spans = self.fetch_range(customer_id, start, end).await?;
        Ok(analytics::summary(&spans))
    }

    async fn fetch_range(
        &self,
        customer_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Span>> {
        let filter = SpanFilter {
            customer_id: Some(customer_id.to_string()),
            start_time: Some(start),
            end_time: Some(end),
            ..Default::default()
        };
        self.store.list_spans(&filter, ANALYTICS_FETCH_CAP, 0).await
    }
}

/// Default analytics range when the caller omits one: the trailing 24 hours
pub fn default_range() -> (DateTime<Utc>, DateTime<Utc>) {
    let end = Utc::now();
    (end - Duration::hours(24), end)
}
