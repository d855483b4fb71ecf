//! Shared harness for end-to-end pipeline tests.
//!
//! Wires receiver → queue → worker pool → store → baseline/anomaly engines
//! the same way `main` does, but drains the queue synchronously so tests
//! stay deterministic.

use std::sync::Arc;

use llm_trace_observatory::baseline::{AnomalyDetector, BaselineEngine};
use llm_trace_observatory::config::Config;
use llm_trace_observatory::ingest::receiver::{IngestOutcome, IngestRequest};
use llm_trace_observatory::ingest::{
    Enricher, InMemoryQueue, QuotaGuard, Receiver, TraceQueue, WorkerPool,
};
use llm_trace_observatory::pricing::PricingTable;
use llm_trace_observatory::query::QueryService;
use llm_trace_observatory::store::InMemoryStore;

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub queue: InMemoryQueue,
    pub receiver: Receiver,
    pub pool: WorkerPool,
    pub query: QueryService,
    pub baselines: Arc<BaselineEngine>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let queue = InMemoryQueue::new(config.queue.clone());
        let queue_dyn: Arc<dyn TraceQueue> = Arc::new(queue.clone());

        let quota = Arc::new(QuotaGuard::new(config.ingest.daily_trace_quota));
        let receiver = Receiver::new(queue_dyn.clone(), quota, config.ingest.max_batch_size);

        let baselines = Arc::new(BaselineEngine::new(store.clone(), config.baseline.clone()));
        let detector = Arc::new(AnomalyDetector::new(
            store.clone(),
            baselines.clone(),
            config.baseline.modal_min_support,
            config.anomaly.clone(),
        ));
        let pool = WorkerPool::new(
            queue_dyn,
            store.clone(),
            Enricher::new(Arc::new(PricingTable::with_defaults())),
            baselines.clone(),
            detector,
            config.workers.clone(),
        );

        let query = QueryService::new(store.clone() as Arc<dyn llm_trace_observatory::store::TraceStore>);

        Self {
            store,
            queue,
            receiver,
            pool,
            query,
            baselines,
        }
    }

    /// Ingest an envelope and synchronously drain the queue through the
    /// worker pipeline.
    pub async fn ingest(&self, customer: &str, traces: Vec<serde_json::Value>) -> IngestOutcome {
        let outcome = self.receiver.ingest(customer, IngestRequest { traces }).await;
        self.drain().await;
        outcome
    }

    pub async fn drain(&self) {
        while self.queue.depth() > 0 {
            let delivery = self.queue.pull().await.expect("queued delivery");
            match self.pool.process_batch(&delivery.batch).await {
                Ok(()) => self.queue.ack(delivery).await,
                Err(_) => self.queue.nack(delivery).await,
            }
        }
    }
}

pub fn default_harness() -> Harness {
    Harness::new(Config::default())
}

/// Minimal valid wire-format span; callers override fields as needed
pub fn span_json(trace_id: &str, span_id: &str) -> serde_json::Value {
    serde_json::json!({
        "trace_id": trace_id,
        "span_id": span_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service_name": "svc",
        "endpoint": "/chat",
        "model": "gpt-4",
        "latency_ms": 500.0,
        "prompt_tokens": 100,
        "completion_tokens": 50,
        "status": "success",
        "response": "the usual answer"
    })
}
