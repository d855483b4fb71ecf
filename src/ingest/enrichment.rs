use std::sync::Arc;

use crate::models::{Provider, Span};
use crate::pricing::{PricingTable, FALLBACK_RATES};

use super::{DegradedThrottle, NormalizedSpan};

/// Per-span enrichment: provider/token normalisation, cost derivation, and
/// response fingerprinting. Runs on the worker, before persistence.
pub struct Enricher {
    pricing: Arc<PricingTable>,
    throttle: DegradedThrottle,
}

impl Enricher {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            pricing,
            throttle: DegradedThrottle::new(),
        }
    }

    /// Turn a validated queue span into the persistable span
    pub fn enrich(&self, normalized: NormalizedSpan) -> Span {
        let provider = normalized
            .provider
            .unwrap_or_else(|| Provider::from_model(&normalized.model));

        let tokens = normalized.tokens.or_else(|| {
            match (normalized.prompt_tokens, normalized.completion_tokens) {
                (None, None) => None,
                (prompt, completion) => Some(prompt.unwrap_or(0) + completion.unwrap_or(0)),
            }
        });

        let mut metadata = match normalized.metadata {
            Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
            _ => serde_json::json!({}),
        };

        let cost_usd = match normalized.cost_usd {
            Some(client_cost) => client_cost.max(0.0),
            None => self.derive_cost(
                provider,
                &normalized.model,
                normalized.prompt_tokens,
                normalized.completion_tokens,
                &mut metadata,
            ),
        };

        let response_hash = normalized
            .response
            .as_deref()
            .map(Span::fingerprint_response);

        Span {
            trace_id: normalized.trace_id,
            span_id: normalized.span_id,
            parent_span_id: normalized.parent_span_id,
            customer_id: normalized.customer_id,
            service_name: normalized.service_name,
            endpoint: normalized.endpoint,
            environment: normalized.environment,
            timestamp: normalized.timestamp,
            latency_ms: normalized.latency_ms.max(0.0),
            model: normalized.model,
            provider,
            prompt: normalized.prompt,
            response: normalized.response,
            prompt_tokens: normalized.prompt_tokens,
            completion_tokens: normalized.completion_tokens,
            tokens,
            cost_usd,
            response_hash,
            semantic_score: None,
            hash_similarity: None,
            semantic_scored_at: None,
            semantic_cached: None,
            metadata,
            tags: normalized.tags.unwrap_or_default(),
            status: normalized.status,
            error_message: normalized.error_message,
        }
    }

    fn derive_cost(
        &self,
        provider: Provider,
        model: &str,
        prompt_tokens: Option<i64>,
        completion_tokens: Option<i64>,
        metadata: &mut serde_json::Value,
    ) -> f64 {
        let (prompt, completion) = match (prompt_tokens, completion_tokens) {
            // No token counts at all: cost is uncomputable
            (None, None) => return 0.0,
            (prompt, completion) => (prompt.unwrap_or(0), completion.unwrap_or(0)),
        };

        match self.pricing.lookup(provider, model) {
            Some(rates) => rates.cost(prompt, completion),
            None => {
                if self.throttle.first_this_minute("pricing_miss") {
                    tracing::warn!(
                        provider = %provider,
                        model = %model,
                        "Model missing from pricing table, using fallback rates"
                    );
                }
                if let serde_json::Value::Object(ref mut map) = metadata {
                    map.insert("cost_uncertain".to_string(), serde_json::Value::Bool(true));
                }
                FALLBACK_RATES.cost(prompt, completion)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Environment, SpanStatus};
    use chrono::Utc;

    fn normalized() -> NormalizedSpan {
        NormalizedSpan {
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
            provider: None,
            prompt: Some("question".to_string()),
            response: Some("Answer Text".to_string()),
            prompt_tokens: Some(100),
            completion_tokens: Some(50),
            tokens: None,
            cost_usd: None,
            status: SpanStatus::Success,
            error_message: None,
            metadata: None,
            tags: None,
        }
    }

    fn enricher() -> Enricher {
        Enricher::new(Arc::new(PricingTable::with_defaults()))
    }

    #[test]
    fn test_full_enrichment() {
        let span = enricher().enrich(normalized());

        assert_eq!(span.provider, Provider::Openai);
        assert_eq!(span.tokens, Some(150));
        // 100/1M * 30 + 50/1M * 60
        assert!((span.cost_usd - 0.006).abs() < 1e-9);
        assert_eq!(
            span.response_hash.as_deref(),
            Some(Span::fingerprint_response("answer text").as_str())
        );
        assert_eq!(span.metadata.get("cost_uncertain"), None);
    }

    #[test]
    fn test_client_cost_wins() {
        let mut input = normalized();
        input.cost_usd = Some(0.123);

        let span = enricher().enrich(input);
        assert!((span.cost_usd - 0.123).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_fallback() {
        let mut input = normalized();
        input.model = "mystery-lm-9000".to_string();

        let span = enricher().enrich(input);
        // 100/1M * 1 + 50/1M * 2
        assert!((span.cost_usd - 0.0002).abs() < 1e-12);
        assert_eq!(
            span.metadata.get("cost_uncertain"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_no_tokens_means_zero_cost() {
        let mut input = normalized();
        input.prompt_tokens = None;
        input.completion_tokens = None;

        let span = enricher().enrich(input);
        assert_eq!(span.cost_usd, 0.0);
        assert_eq!(span.tokens, None);
    }

    #[test]
    fn test_explicit_provider_kept() {
        let mut input = normalized();
        input.provider = Some(Provider::Anthropic);

        let span = enricher().enrich(input);
        assert_eq!(span.provider, Provider::Anthropic);
    }

    #[test]
    fn test_client_tokens_total_kept() {
        let mut input = normalized();
        input.tokens = Some(999);

        let span = enricher().enrich(input);
        assert_eq!(span.tokens, Some(999));
    }
}
