use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use validator::Validate;

use crate::models::{Environment, Provider, SpanStatus};

use super::{NormalizedSpan, QuotaGuard, SpanBatch, TraceQueue};

/// Hard ceiling on latency: spans claiming more than 24h are malformed
const MAX_LATENCY_MS: f64 = 86_400_000.0;

/// Ingest envelope: `POST /v1/traces`.
///
/// Spans are kept as raw JSON so one malformed entry is rejected
/// individually instead of failing the whole envelope.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub traces: Vec<serde_json::Value>,
}

/// Wire-format span, everything optional so validation can name the gap
#[derive(Debug, Deserialize, Validate)]
struct RawSpan {
    #[validate(length(min = 1, max = 128))]
    trace_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    span_id: Option<String>,
    #[validate(length(max = 128))]
    parent_span_id: Option<String>,
    timestamp: Option<String>,
    #[validate(length(min = 1, max = 255))]
    service_name: Option<String>,
    #[validate(length(min = 1, max = 512))]
    endpoint: Option<String>,
    environment: Option<String>,
    #[validate(length(min = 1, max = 255))]
    model: Option<String>,
    provider: Option<String>,
    prompt: Option<String>,
    response: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    tokens: Option<i64>,
    latency_ms: Option<f64>,
    cost_usd: Option<f64>,
    status: Option<String>,
    error_message: Option<String>,
    metadata: Option<serde_json::Value>,
    tags: Option<Vec<String>>,
}

/// Per-span rejection code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    InvalidField,
    OutOfRange,
    InvalidEnum,
    QuotaExceeded,
    Backpressure,
}

/// One rejected span in the ingest response
#[derive(Debug, Clone, Serialize)]
pub struct SpanRejection {
    pub index: usize,
    pub code: RejectCode,
    pub message: String,
}

/// Body of the 202 response
#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub success: bool,
    pub traces_received: usize,
    pub errors: Vec<SpanRejection>,
}

/// Validates, rate-limits, and enqueues incoming span batches.
///
/// Does no I/O beyond the queue publish; enrichment and persistence belong
/// to the worker pool.
pub struct Receiver {
    queue: Arc<dyn TraceQueue>,
    quota: Arc<QuotaGuard>,
    max_batch_size: usize,
}

impl Receiver {
    pub fn new(queue: Arc<dyn TraceQueue>, quota: Arc<QuotaGuard>, max_batch_size: usize) -> Self {
        Self {
            queue,
            quota,
            max_batch_size,
        }
    }

    /// Process one envelope for an authenticated customer. Always resolves
    /// to a per-span outcome list; validation failures are never retried.
    pub async fn ingest(&self, customer_id: &str, request: IngestRequest) -> IngestOutcome {
        let mut accepted: Vec<NormalizedSpan> = Vec::new();
        let mut accepted_indices: Vec<usize> = Vec::new();
        let mut errors: Vec<SpanRejection> = Vec::new();

        for (index, raw) in request.traces.into_iter().enumerate() {
            if index >= self.max_batch_size {
                errors.push(SpanRejection {
                    index,
                    code: RejectCode::OutOfRange,
                    message: format!("batch exceeds {} spans", self.max_batch_size),
                });
                continue;
            }

            match validate_span(raw, customer_id) {
                Ok(span) => {
                    if self.quota.try_consume(customer_id) {
                        accepted.push(span);
                        accepted_indices.push(index);
                    } else {
                        errors.push(SpanRejection {
                            index,
                            code: RejectCode::QuotaExceeded,
                            message: "daily trace quota exceeded".to_string(),
                        });
                    }
                }
                Err((code, message)) => {
                    errors.push(SpanRejection {
                        index,
                        code,
                        message,
                    });
                }
            }
        }

        let mut received = accepted.len();
        if !accepted.is_empty() {
            if let Err(e) = self.queue.publish(SpanBatch::new(accepted)).await {
                tracing::warn!(error = %e, "Ingest batch rejected by queue");
                received = 0;
                for index in accepted_indices {
                    errors.push(SpanRejection {
                        index,
                        code: RejectCode::Backpressure,
                        message: "queue is at capacity, retry with backoff".to_string(),
                    });
                }
            }
        }

        for rejection in &errors {
            crate::metrics::INGEST_REJECTED_TOTAL
                .with_label_values(&[rejection.code.to_string().as_str()])
                .inc();
        }
        crate::metrics::INGEST_ACCEPTED_TOTAL.inc_by(received as f64);

        IngestOutcome {
            success: errors.is_empty(),
            traces_received: received,
            errors,
        }
    }
}

type ValidationError = (RejectCode, String);

fn missing(field: &str) -> ValidationError {
    (RejectCode::InvalidField, format!("missing field {}", field))
}

fn validate_span(
    raw: serde_json::Value,
    customer_id: &str,
) -> std::result::Result<NormalizedSpan, ValidationError> {
    let raw: RawSpan = serde_json::from_value(raw)
        .map_err(|e| (RejectCode::InvalidField, format!("malformed span: {}", e)))?;
    raw.validate()
        .map_err(|e| (RejectCode::InvalidField, e.to_string()))?;

    let trace_id = non_empty(raw.trace_id).ok_or_else(|| missing("trace_id"))?;
    let span_id = non_empty(raw.span_id).ok_or_else(|| missing("span_id"))?;
    let service_name = non_empty(raw.service_name).ok_or_else(|| missing("service_name"))?;
    let endpoint = non_empty(raw.endpoint).ok_or_else(|| missing("endpoint"))?;
    let model = non_empty(raw.model).ok_or_else(|| missing("model"))?;

    let timestamp = raw.timestamp.ok_or_else(|| missing("timestamp"))?;
    let timestamp: DateTime<Utc> = timestamp
        .parse()
        .map_err(|_| {
            (
                RejectCode::InvalidField,
                format!("timestamp is not ISO-8601: {}", timestamp),
            )
        })?;

    let status = raw.status.ok_or_else(|| missing("status"))?;
    let status: SpanStatus = status.parse().map_err(|_| {
        (
            RejectCode::InvalidEnum,
            format!("status must be success or error, got {}", status),
        )
    })?;

    let environment = match raw.environment {
        None => Environment::default(),
        Some(value) => value.parse().map_err(|_| {
            (
                RejectCode::InvalidEnum,
                format!("environment must be live or test, got {}", value),
            )
        })?,
    };

    let provider = match raw.provider {
        None => None,
        Some(value) => Some(value.parse::<Provider>().map_err(|_| {
            (
                RejectCode::InvalidEnum,
                format!("unknown provider {}", value),
            )
        })?),
    };

    let latency_ms = raw.latency_ms.unwrap_or(0.0);
    if !(0.0..=MAX_LATENCY_MS).contains(&latency_ms) {
        return Err((
            RejectCode::OutOfRange,
            format!("latency_ms {} outside [0, 24h]", latency_ms),
        ));
    }

    Ok(NormalizedSpan {
        trace_id,
        span_id,
        parent_span_id: raw.parent_span_id,
        // The authenticated customer always wins over client-supplied values
        customer_id: customer_id.to_string(),
        service_name,
        endpoint,
        environment,
        timestamp,
        latency_ms,
        model,
        provider,
        prompt: raw.prompt,
        response: raw.response,
        prompt_tokens: raw.prompt_tokens,
        completion_tokens: raw.completion_tokens,
        tokens: raw.tokens,
        cost_usd: raw.cost_usd,
        status,
        error_message: raw.error_message,
        metadata: raw.metadata,
        tags: raw.tags,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ingest::InMemoryQueue;
    use serde_json::json;

    fn receiver_with(quota: u64) -> (Receiver, InMemoryQueue) {
        let queue = InMemoryQueue::new(Config::default().queue);
        let receiver = Receiver::new(
            Arc::new(queue.clone()),
            Arc::new(QuotaGuard::new(quota)),
            1000,
        );
        (receiver, queue)
    }

    fn valid_span(span_id: &str) -> serde_json::Value {
        json!({
            "trace_id": "t1",
            "span_id": span_id,
            "timestamp": "2026-07-01T12:00:00Z",
            "service_name": "svc",
            "endpoint": "/chat",
            "model": "gpt-4",
            "latency_ms": 500.0,
            "prompt_tokens": 100,
            "completion_tokens": 50,
            "status": "success"
        })
    }

    #[tokio::test]
    async fn test_valid_batch_accepted() {
        let (receiver, queue) = receiver_with(100);

        let outcome = receiver
            .ingest(
                "cust-1",
                IngestRequest {
                    traces: vec![valid_span("s1"), valid_span("s2")],
                },
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.traces_received, 2);
        assert!(outcome.errors.is_empty());

        let delivery = queue.pull().await.unwrap();
        assert_eq!(delivery.batch.spans.len(), 2);
        assert_eq!(delivery.batch.spans[0].customer_id, "cust-1");
    }

    #[tokio::test]
    async fn test_missing_field_rejected_individually() {
        let (receiver, _queue) = receiver_with(100);

        let mut broken = valid_span("s2");
        broken.as_object_mut().unwrap().remove("model");

        let outcome = receiver
            .ingest(
                "cust-1",
                IngestRequest {
                    traces: vec![valid_span("s1"), broken],
                },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.traces_received, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);
        assert_eq!(outcome.errors[0].code, RejectCode::InvalidField);
    }

    #[tokio::test]
    async fn test_latency_out_of_range() {
        let (receiver, _queue) = receiver_with(100);

        let mut negative = valid_span("s1");
        negative["latency_ms"] = json!(-5.0);
        let mut huge = valid_span("s2");
        huge["latency_ms"] = json!(90_000_000.0);

        let outcome = receiver
            .ingest(
                "cust-1",
                IngestRequest {
                    traces: vec![negative, huge],
                },
            )
            .await;

        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .all(|e| e.code == RejectCode::OutOfRange));
    }

    #[tokio::test]
    async fn test_invalid_status_enum() {
        let (receiver, _queue) = receiver_with(100);

        let mut bad = valid_span("s1");
        bad["status"] = json!("crashed");

        let outcome = receiver
            .ingest("cust-1", IngestRequest { traces: vec![bad] })
            .await;

        assert_eq!(outcome.errors[0].code, RejectCode::InvalidEnum);
    }

    #[tokio::test]
    async fn test_environment_defaults_to_live() {
        let (receiver, queue) = receiver_with(100);

        let outcome = receiver
            .ingest(
                "cust-1",
                IngestRequest {
                    traces: vec![valid_span("s1")],
                },
            )
            .await;
        assert!(outcome.success);

        let delivery = queue.pull().await.unwrap();
        assert_eq!(delivery.batch.spans[0].environment, Environment::Live);
    }

    #[tokio::test]
    async fn test_quota_rejects_excess() {
        let (receiver, _queue) = receiver_with(5);

        let traces: Vec<_> = (0..6).map(|i| valid_span(&format!("s{}", i))).collect();
        let outcome = receiver
            .ingest("cust-1", IngestRequest { traces })
            .await;

        assert_eq!(outcome.traces_received, 5);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 5);
        assert_eq!(outcome.errors[0].code, RejectCode::QuotaExceeded);
    }

    #[tokio::test]
    async fn test_backpressure_reported_per_span() {
        let queue = InMemoryQueue::new(crate::config::QueueConfig {
            high_water_mark: 1,
            publish_timeout_ms: 10,
            ..Config::default().queue
        });
        let receiver = Receiver::new(
            Arc::new(queue.clone()),
            Arc::new(QuotaGuard::new(100)),
            1000,
        );

        // Fill the queue
        let first = receiver
            .ingest(
                "cust-1",
                IngestRequest {
                    traces: vec![valid_span("s1")],
                },
            )
            .await;
        assert!(first.success);

        let second = receiver
            .ingest(
                "cust-1",
                IngestRequest {
                    traces: vec![valid_span("s2")],
                },
            )
            .await;
        assert!(!second.success);
        assert_eq!(second.traces_received, 0);
        assert_eq!(second.errors[0].code, RejectCode::Backpressure);
    }

    #[test]
    fn test_reject_code_wire_format() {
        assert_eq!(RejectCode::InvalidField.to_string(), "INVALID_FIELD");
        assert_eq!(RejectCode::QuotaExceeded.to_string(), "QUOTA_EXCEEDED");
        assert_eq!(
            serde_json::to_string(&RejectCode::Backpressure).unwrap(),
            "\"BACKPRESSURE\""
        );
    }
}
