pub mod enrichment;
pub mod queue;
pub mod quota;
pub mod receiver;
pub mod worker;

pub use enrichment::Enricher;
pub use queue::{InMemoryQueue, SpanBatch, TraceQueue};
pub use quota::QuotaGuard;
pub use receiver::{IngestOutcome, Receiver};
pub use worker::WorkerPool;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};

use crate::models::{Environment, Provider, SpanStatus};

/// A span that passed receiver validation and awaits worker enrichment.
///
/// This is the queue payload: required fields are unwrapped, enums are
/// parsed, `customer_id` is injected, but cost/hash/provider-inference are
/// still the worker's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSpan {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub customer_id: String,
    pub service_name: String,
    pub endpoint: String,
    pub environment: Environment,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub model: String,
    /// Client-supplied provider; None means infer from the model
    pub provider: Option<Provider>,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub tokens: Option<i64>,
    /// Client-supplied cost; None means compute from the pricing table
    pub cost_usd: Option<f64>,
    pub status: SpanStatus,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
}

/// Once-per-(condition, minute) gate for degraded-mode log lines
#[derive(Default)]
pub struct DegradedThrottle {
    seen: DashSet<(String, i64)>,
}

impl DegradedThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a condition fires in the current minute
    pub fn first_this_minute(&self, condition: &str) -> bool {
        let minute = Utc::now().timestamp() / 60;
        // Bounded: old minutes are dropped whenever the set grows
        if self.seen.len() > 1024 {
            self.seen.retain(|(_, m)| *m == minute);
        }
        self.seen.insert((condition.to_string(), minute))
    }
}
