use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::baseline::{AnomalyDetector, BaselineEngine};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::models::Span;
use crate::scoring::SemanticScorer;
use crate::store::TraceStore;

use super::queue::{SpanBatch, TraceQueue};
use super::{DegradedThrottle, Enricher};

const MIN_PULL_DELAY_MS: u64 = 50;
const PULL_DELAY_DECAY_MS: u64 = 50;

/// AIMD pull pacing: when store writes stay slow for the configured window,
/// the pull delay doubles (capped); any fast write decays it additively.
pub struct PullPacer {
    threshold: Duration,
    window: Duration,
    max_delay_ms: u64,
    state: parking_lot::Mutex<PacerState>,
}

#[derive(Default)]
struct PacerState {
    delay_ms: u64,
    slow_since: Option<Instant>,
}

impl PullPacer {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            threshold: Duration::from_millis(config.store_latency_threshold_ms),
            window: Duration::from_secs(config.slowdown_window_secs),
            max_delay_ms: config.max_pull_delay_ms,
            state: parking_lot::Mutex::new(PacerState::default()),
        }
    }

    pub fn observe(&self, write_latency: Duration) {
        let mut state = self.state.lock();
        if write_latency > self.threshold {
            let slow_since = *state.slow_since.get_or_insert_with(Instant::now);
            if slow_since.elapsed() >= self.window {
                state.delay_ms = (state.delay_ms.max(MIN_PULL_DELAY_MS) * 2).min(self.max_delay_ms);
            }
        } else {
            state.slow_since = None;
            state.delay_ms = state.delay_ms.saturating_sub(PULL_DELAY_DECAY_MS);
        }
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.state.lock().delay_ms)
    }
}

/// Consumes batches from the queue and runs the per-span pipeline:
/// enrich (normalise, cost, hash) → score → persist → baseline sample →
/// anomaly evaluation.
pub struct WorkerPool {
    queue: Arc<dyn TraceQueue>,
    store: Arc<dyn TraceStore>,
    enricher: Enricher,
    baselines: Arc<BaselineEngine>,
    detector: Arc<AnomalyDetector>,
    scorer: Option<Arc<dyn SemanticScorer>>,
    throttle: DegradedThrottle,
    pacer: PullPacer,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn TraceQueue>,
        store: Arc<dyn TraceStore>,
        enricher: Enricher,
        baselines: Arc<BaselineEngine>,
        detector: Arc<AnomalyDetector>,
        config: WorkerConfig,
    ) -> Self {
        let pacer = PullPacer::new(&config);
        Self {
            queue,
            store,
            enricher,
            baselines,
            detector,
            scorer: None,
            throttle: DegradedThrottle::new(),
            pacer,
            config,
        }
    }

    /// Attach the external semantic scorer hook
    pub fn with_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Spawn the configured number of worker tasks
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.count.max(1))
            .map(|worker_id| {
                let pool = Arc::clone(&self);
                tokio::spawn(async move {
                    pool.run_worker(worker_id).await;
                })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize) {
        tracing::info!(worker_id, "Ingest worker started");

        loop {
            let delay = self.pacer.current_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let Some(delivery) = self.queue.pull().await else {
                tracing::info!(worker_id, "Queue closed, worker exiting");
                break;
            };

            match self.process_batch(&delivery.batch).await {
                Ok(()) => self.queue.ack(delivery).await,
                Err(e) => {
                    tracing::warn!(
                        worker_id,
                        batch_id = %delivery.batch.batch_id,
                        attempt = delivery.attempt,
                        error = %e,
                        "Batch processing failed, nacking"
                    );
                    self.queue.nack(delivery).await;
                }
            }
        }
    }

    /// Run the pipeline over every span of one batch.
    ///
    /// An `Err` means the whole batch should be redelivered (transient store
    /// failure); non-transient per-span failures drop the span and continue.
    pub async fn process_batch(&self, batch: &SpanBatch) -> Result<()> {
        for normalized in &batch.spans {
            let mut span = self.enricher.enrich(normalized.clone());
            self.apply_scorer(&mut span).await;

            let started = Instant::now();
            let write = self.store.upsert_span(&span).await;
            let elapsed = started.elapsed();
            self.pacer.observe(elapsed);
            crate::metrics::STORE_WRITE_SECONDS.observe(elapsed.as_secs_f64());

            match write {
                Ok(()) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    // Constraint violation or similar: this span cannot ever
                    // succeed, drop it and keep the rest of the batch
                    tracing::error!(
                        trace_id = %span.trace_id,
                        span_id = %span.span_id,
                        error = %e,
                        "Dropping unpersistable span"
                    );
                    continue;
                }
            }

            if let Err(e) = self.baselines.record_span(&span).await {
                if self.throttle.first_this_minute("baseline_update_failed") {
                    tracing::warn!(error = %e, "Baseline update failed, continuing");
                }
            }

            if let Err(e) = self.detector.evaluate(&span).await {
                tracing::error!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    error = %e,
                    "Anomaly evaluation failed"
                );
            }

            crate::metrics::SPANS_PROCESSED_TOTAL.inc();
        }

        crate::metrics::BATCH_SPANS.observe(batch.spans.len() as f64);
        Ok(())
    }

    async fn apply_scorer(&self, span: &mut Span) {
        let Some(ref scorer) = self.scorer else {
            return;
        };

        match scorer.score(span).await {
            Ok(Some(outcome)) => {
                span.semantic_score = outcome.semantic_score;
                span.hash_similarity = outcome.hash_similarity;
                span.semantic_scored_at = Some(outcome.scored_at);
                span.semantic_cached = Some(outcome.cached);
            }
            Ok(None) => {}
            Err(e) => {
                // Degraded: classification falls back to hash-only evidence
                if self.throttle.first_this_minute("scorer_unavailable") {
                    tracing::warn!(error = %e, "Semantic scorer unavailable, using hash-only scoring");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ingest::{InMemoryQueue, NormalizedSpan};
    use crate::models::{Environment, SpanKey, SpanStatus};
    use crate::pricing::PricingTable;
    use crate::scoring::testing::StaticScorer;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn normalized(trace_id: &str, span_id: &str) -> NormalizedSpan {
        NormalizedSpan {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: None,
            customer_id: "cust-1".to_string(),
            service_name: "svc".to_string(),
            endpoint: "/chat".to_string(),
            environment: Environment::Live,
            timestamp: Utc::now(),
            latency_ms: 500.0,
            model: "gpt-4".to_string(),
            provider: None,
            prompt: Some("q".to_string()),
            response: Some("a".to_string()),
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

    fn pool(store: Arc<InMemoryStore>) -> WorkerPool {
        let config = Config::default();
        let queue = InMemoryQueue::new(config.queue.clone());
        let baselines = Arc::new(BaselineEngine::new(store.clone(), config.baseline.clone()));
        let detector = Arc::new(AnomalyDetector::new(
            store.clone(),
            baselines.clone(),
            config.baseline.modal_min_support,
            config.anomaly.clone(),
        ));
        WorkerPool::new(
            Arc::new(queue),
            store,
            Enricher::new(Arc::new(PricingTable::with_defaults())),
            baselines,
            detector,
            config.workers,
        )
    }

    #[tokio::test]
    async fn test_batch_enriched_and_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let pool = pool(store.clone());

        let batch = SpanBatch::new(vec![normalized("t1", "s1"), normalized("t1", "s2")]);
        pool.process_batch(&batch).await.unwrap();

        let span = store
            .get_span(&SpanKey::new("t1", "s1"))
            .await
            .unwrap()
            .expect("persisted");
        assert!((span.cost_usd - 0.006).abs() < 1e-9);
        assert!(span.response_hash.is_some());
        assert_eq!(span.tokens, Some(150));
    }

    #[tokio::test]
    async fn test_scorer_outcome_applied() {
        let store = Arc::new(InMemoryStore::new());
        let pool = pool(store.clone()).with_scorer(Arc::new(StaticScorer {
            semantic_score: Some(0.9),
            hash_similarity: Some(1.0),
        }));

        let batch = SpanBatch::new(vec![normalized("t1", "s1")]);
        pool.process_batch(&batch).await.unwrap();

        let span = store
            .get_span(&SpanKey::new("t1", "s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(span.semantic_score, Some(0.9));
        assert_eq!(span.hash_similarity, Some(1.0));
        assert!(span.semantic_scored_at.is_some());
    }

    #[test]
    fn test_pacer_backs_off_and_recovers() {
        let config = WorkerConfig {
            store_latency_threshold_ms: 10,
            slowdown_window_secs: 0,
            max_pull_delay_ms: 400,
            ..Config::default().workers
        };
        let pacer = PullPacer::new(&config);
        assert!(pacer.current_delay().is_zero());

        // Sustained slow writes: multiplicative increase
        pacer.observe(Duration::from_millis(50));
        pacer.observe(Duration::from_millis(50));
        let backed_off = pacer.current_delay();
        assert!(backed_off >= Duration::from_millis(100));

        pacer.observe(Duration::from_millis(50));
        assert_eq!(pacer.current_delay(), Duration::from_millis(400));

        // Fast writes: additive decrease down to zero
        for _ in 0..8 {
            pacer.observe(Duration::from_millis(1));
        }
        assert!(pacer.current_delay().is_zero());
    }
}
