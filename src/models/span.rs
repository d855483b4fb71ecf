use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Composite span identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanKey {
    pub trace_id: String,
    pub span_id: String,
}

impl SpanKey {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }
}

/// One observed operation: an LLM call or a wrapping pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Trace this span belongs to
    pub trace_id: String,

    /// Span identifier, unique within the trace
    pub span_id: String,

    /// Parent span; None for root spans
    pub parent_span_id: Option<String>,

    /// Tenant scope, injected by the receiver from the bearer credential
    pub customer_id: String,

    /// Emitting service
    pub service_name: String,

    /// Logical endpoint within the service
    pub endpoint: String,

    /// Deployment environment
    pub environment: Environment,

    /// Wall-clock at span start (UTC)
    pub timestamp: DateTime<Utc>,

    /// Span duration in milliseconds
    pub latency_ms: f64,

    /// Model identifier as reported by the caller
    pub model: String,

    /// LLM provider, inferred from the model when absent
    pub provider: Provider,

    pub prompt: Option<String>,
    pub response: Option<String>,

    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,

    /// Total tokens; prompt + completion when not client-supplied
    pub tokens: Option<i64>,

    /// Derived cost in USD; 0 when uncomputable
    pub cost_usd: f64,

    /// Stable fingerprint of the normalised response text
    pub response_hash: Option<String>,

    pub semantic_score: Option<f64>,
    pub hash_similarity: Option<f64>,
    pub semantic_scored_at: Option<DateTime<Utc>>,
    pub semantic_cached: Option<bool>,

    /// Schemaless key/value bag; carried opaque, never promoted to columns
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Ordered caller-supplied tags
    #[serde(default)]
    pub tags: Vec<String>,

    pub status: SpanStatus,
    pub error_message: Option<String>,
}

impl Span {
    pub fn key(&self) -> SpanKey {
        SpanKey::new(self.trace_id.clone(), self.span_id.clone())
    }

    /// Wall-clock at span end
    pub fn end_time(&self) -> DateTime<Utc> {
        self.timestamp + Duration::milliseconds(self.latency_ms.max(0.0) as i64)
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Stable fingerprint of a response body: lowercased, whitespace
    /// collapsed, SHA-256, hex. Length-independent by construction.
    pub fn fingerprint_response(response: &str) -> String {
        use sha2::{Digest, Sha256};

        let normalised = response
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let mut hasher = Sha256::new();
        hasher.update(normalised.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Deployment environment of an emitting service
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    #[default]
    Live,
    Test,
}

/// LLM provider behind a span
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Cohere,
    #[default]
    Other,
}

impl Provider {
    /// Infer the provider from a model identifier prefix
    pub fn from_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("text-") {
            Provider::Openai
        } else if model.starts_with("claude") {
            Provider::Anthropic
        } else if model.starts_with("command") || model.starts_with("embed-") {
            Provider::Cohere
        } else {
            Provider::Other
        }
    }
}

/// Terminal status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SpanStatus {
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span() -> Span {
        Span {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span_id: None,
            customer_id: "cust-1".to_string(),
            service_name: "svc".to_string(),
            endpoint: "/chat".to_string(),
            environment: Environment::Live,
            timestamp: Utc::now(),
            latency_ms: 500.0,
            model: "gpt-4".to_string(),
            provider: Provider::Openai,
            prompt: Some("hello".to_string()),
            response: Some("world".to_string()),
            prompt_tokens: Some(100),
            completion_tokens: Some(50),
            tokens: Some(150),
            cost_usd: 0.006,
            response_hash: None,
            semantic_score: None,
            hash_similarity: None,
            semantic_scored_at: None,
            semantic_cached: None,
            metadata: serde_json::json!({}),
            tags: vec![],
            status: SpanStatus::Success,
            error_message: None,
        }
    }

    #[test]
    fn test_span_key_and_root() {
        let span = sample_span();
        assert_eq!(span.key(), SpanKey::new("t1", "s1"));
        assert!(span.is_root());
    }

    #[test]
    fn test_end_time() {
        let span = sample_span();
        assert_eq!(
            span.end_time() - span.timestamp,
            Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_fingerprint_normalisation() {
        // Case and whitespace must not change the fingerprint
        let a = Span::fingerprint_response("The  Answer\nis 42");
        let b = Span::fingerprint_response("the answer is   42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = Span::fingerprint_response("a different answer");
        assert_ne!(a, c);
    }

    #[test]
    fn test_provider_inference() {
        assert_eq!(Provider::from_model("gpt-4"), Provider::Openai);
        assert_eq!(Provider::from_model("claude-3-opus"), Provider::Anthropic);
        assert_eq!(Provider::from_model("command-r"), Provider::Cohere);
        assert_eq!(Provider::from_model("llama-3"), Provider::Other);
    }

    #[test]
    fn test_enum_wire_format() {
        assert_eq!(
            serde_json::to_string(&Provider::Anthropic).unwrap(),
            "\"anthropic\""
        );
        assert_eq!(
            serde_json::to_string(&SpanStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::from_str::<Environment>("\"test\"").unwrap(),
            Environment::Test
        );
    }
}
