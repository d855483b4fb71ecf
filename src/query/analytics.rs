//! Aggregated analytics over filtered span sets.
//!
//! Aggregation runs in-process over rows fetched from the store, so both
//! backends share one implementation and one set of semantics.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use strum::{Display, EnumString};

use crate::models::{Span, SpanStatus};

/// Time-bucket width for timeline aggregation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl Granularity {
    /// Truncate a timestamp to the start of its bucket
    fn truncate(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let day = Utc
            .with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
            .unwrap();
        match self {
            Granularity::Hour => day + Duration::hours(at.hour() as i64),
            Granularity::Day => day,
            Granularity::Week => day - Duration::days(at.weekday().num_days_from_monday() as i64),
            Granularity::Month => Utc
                .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
                .unwrap(),
        }
    }

    fn advance(&self, bucket: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hour => bucket + Duration::hours(1),
            Granularity::Day => bucket + Duration::days(1),
            Granularity::Week => bucket + Duration::weeks(1),
            Granularity::Month => bucket + Months::new(1),
        }
    }
}

/// One timeline data point; empty buckets are emitted zero-filled
#[derive(Debug, Clone, Serialize)]
pub struct TimelineBucket {
    pub bucket: DateTime<Utc>,
    pub count: u64,
    #[serde(rename = "totalCost")]
    pub total_cost: f64,
    #[serde(rename = "avgLatency")]
    pub avg_latency: f64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: i64,
}

/// Grouping axis for breakdown aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BreakdownDimension {
    Service,
    Model,
    Endpoint,
    Provider,
}

/// One breakdown row, ordered by total cost descending
#[derive(Debug, Clone, Serialize)]
pub struct BreakdownRow {
    pub dimension: String,
    pub count: u64,
    #[serde(rename = "totalCost")]
    pub total_cost: f64,
    #[serde(rename = "avgLatency")]
    pub avg_latency: f64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PercentileSet {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Interpolated cost and latency percentiles over a filtered set
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PercentileReport {
    pub cost: PercentileSet,
    pub latency: PercentileSet,
}

/// High-level usage summary for one customer and range
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "totalCost")]
    pub total_cost: f64,
    #[serde(rename = "avgCost")]
    pub avg_cost: f64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: i64,
    #[serde(rename = "avgLatency")]
    pub avg_latency: f64,
    #[serde(rename = "errorRate")]
    pub error_rate: f64,
    #[serde(rename = "uniqueServices")]
    pub unique_services: u64,
    #[serde(rename = "uniqueModels")]
    pub unique_models: u64,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    total_cost: f64,
    total_latency: f64,
    total_tokens: i64,
}

impl Accumulator {
    fn push(&mut self, span: &Span) {
        self.count += 1;
        self.total_cost += span.cost_usd;
        self.total_latency += span.latency_ms;
        self.total_tokens += span.tokens.unwrap_or(0);
    }

    fn avg_latency(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_latency / self.count as f64
        }
    }
}

/// Time-bucketed aggregation; every bucket in [start, end] is present
pub fn timeline(
    spans: &[Span],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<TimelineBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();

    let mut cursor = granularity.truncate(start);
    while cursor <= end {
        buckets.insert(cursor, Accumulator::default());
        cursor = granularity.advance(cursor);
    }

    for span in spans {
        if span.timestamp < start || span.timestamp > end {
            continue;
        }
        buckets
            .entry(granularity.truncate(span.timestamp))
            .or_default()
            .push(span);
    }

    buckets
        .into_iter()
        .map(|(bucket, acc)| TimelineBucket {
            bucket,
            count: acc.count,
            total_cost: acc.total_cost,
            avg_latency: acc.avg_latency(),
            total_tokens: acc.total_tokens,
        })
        .collect()
}

/// Group by one dimension, ordered by total cost descending, capped
pub fn breakdown(spans: &[Span], dimension: BreakdownDimension, limit: usize) -> Vec<BreakdownRow> {
    let mut groups: HashMap<String, Accumulator> = HashMap::new();

    for span in spans {
        let key = match dimension {
            BreakdownDimension::Service => span.service_name.clone(),
            BreakdownDimension::Model => span.model.clone(),
            BreakdownDimension::Endpoint => span.endpoint.clone(),
            BreakdownDimension::Provider => span.provider.to_string(),
        };
        groups.entry(key).or_default().push(span);
    }

    let mut rows: Vec<BreakdownRow> = groups
        .into_iter()
        .map(|(dimension, acc)| BreakdownRow {
            dimension,
            count: acc.count,
            total_cost: acc.total_cost,
            avg_latency: acc.avg_latency(),
            total_tokens: acc.total_tokens,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_cost
            .partial_cmp(&a.total_cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.dimension.cmp(&b.dimension))
    });
    rows.truncate(limit);
    rows
}

/// Continuous (linearly interpolated) percentiles for cost and latency
pub fn percentiles(spans: &[Span]) -> PercentileReport {
    let mut costs: Vec<f64> = spans.iter().map(|s| s.cost_usd).collect();
    let mut latencies: Vec<f64> = spans.iter().map(|s| s.latency_ms).collect();
    costs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    PercentileReport {
        cost: PercentileSet {
            p50: interpolated(&costs, 50.0),
            p95: interpolated(&costs, 95.0),
            p99: interpolated(&costs, 99.0),
        },
        latency: PercentileSet {
            p50: interpolated(&latencies, 50.0),
            p95: interpolated(&latencies, 95.0),
            p99: interpolated(&latencies, 99.0),
        },
    }
}

/// Linear-interpolation percentile over sorted data
fn interpolated(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = percentile / 100.0 * (n - 1) as f64;
            let low = rank.floor() as usize;
            let high = rank.ceil() as usize;
            if low == high {
                sorted[low]
            } else {
                let weight = rank - low as f64;
                sorted[low] * (1.0 - weight) + sorted[high] * weight
            }
        }
    }
}

/// Whole-range usage summary
pub fn summary(spans: &[Span]) -> SummaryReport {
    let total_requests = spans.len() as u64;
    let total_cost: f64 = spans.iter().map(|s| s.cost_usd).sum();
    let total_tokens: i64 = spans.iter().map(|s| s.tokens.unwrap_or(0)).sum();
    let total_latency: f64 = spans.iter().map(|s| s.latency_ms).sum();
    let errors = spans
        .iter()
        .filter(|s| s.status == SpanStatus::Error)
        .count() as u64;

    let services: HashSet<&str> = spans.iter().map(|s| s.service_name.as_str()).collect();
    let models: HashSet<&str> = spans.iter().map(|s| s.model.as_str()).collect();

    let denominator = total_requests.max(1) as f64;
    SummaryReport {
        total_requests,
        total_cost,
        avg_cost: total_cost / denominator,
        total_tokens,
        avg_latency: total_latency / denominator,
        error_rate: errors as f64 / denominator,
        unique_services: services.len() as u64,
        unique_models: models.len() as u64,
    }
}
