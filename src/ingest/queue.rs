use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{AppError, Result};

use super::NormalizedSpan;

/// One published unit of work: the validated spans of a single ingest call
#[derive(Debug, Clone)]
pub struct SpanBatch {
    pub batch_id: Uuid,
    pub spans: Vec<NormalizedSpan>,
    pub enqueued_at: DateTime<Utc>,
}

impl SpanBatch {
    pub fn new(spans: Vec<NormalizedSpan>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            spans,
            enqueued_at: Utc::now(),
        }
    }
}

/// A pulled batch carrying its delivery attempt count
#[derive(Debug)]
pub struct Delivery {
    pub batch: SpanBatch,
    pub attempt: u32,
}

/// Bounded FIFO of span batches with at-least-once delivery.
///
/// Publish signals backpressure past the high-water mark instead of
/// blocking; consumers ack or nack each delivery, nacks are retried with
/// exponential backoff and dead-lettered past the retry limit. Per-trace
/// ordering is not guaranteed; the store and baselines are commutative.
#[async_trait]
pub trait TraceQueue: Send + Sync {
    /// Publish a batch; `AppError::Backpressure` past the bounded wait
    async fn publish(&self, batch: SpanBatch) -> Result<()>;

    /// Pull the next delivery; None once the queue is closed and drained
    async fn pull(&self) -> Option<Delivery>;

    /// Processing succeeded
    async fn ack(&self, delivery: Delivery);

    /// Processing failed; retry with backoff or dead-letter
    async fn nack(&self, delivery: Delivery);

    /// Current depth (published, not yet pulled)
    fn depth(&self) -> usize;
}

struct QueueInner {
    tx: mpsc::Sender<Delivery>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    depth: AtomicUsize,
    dead_letters: parking_lot::Mutex<Vec<SpanBatch>>,
    config: QueueConfig,
}

impl QueueInner {
    fn record_depth(&self, depth: usize) {
        crate::metrics::QUEUE_DEPTH.set(depth as f64);
    }
}

/// In-process queue backend over a bounded tokio channel.
///
/// The dead-letter sink is an inspection-only buffer; nothing re-processes
/// it automatically.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<QueueInner>,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.high_water_mark.max(1));
        Self {
            inner: Arc::new(QueueInner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                depth: AtomicUsize::new(0),
                dead_letters: parking_lot::Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    /// Dead-lettered batches, newest last (inspection only)
    pub fn dead_letters(&self) -> Vec<SpanBatch> {
        self.inner.dead_letters.lock().clone()
    }

    fn backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        std::time::Duration::from_millis(
            self.inner.config.retry_backoff_ms.saturating_mul(factor),
        )
    }
}

#[async_trait]
impl TraceQueue for InMemoryQueue {
    async fn publish(&self, batch: SpanBatch) -> Result<()> {
        let delivery = Delivery { batch, attempt: 1 };
        let timeout = std::time::Duration::from_millis(self.inner.config.publish_timeout_ms);

        match tokio::time::timeout(timeout, self.inner.tx.send(delivery)).await {
            Ok(Ok(())) => {
                let depth = self.inner.depth.fetch_add(1, Ordering::SeqCst) + 1;
                self.inner.record_depth(depth);
                Ok(())
            }
            Ok(Err(_)) => Err(AppError::Internal("queue closed".to_string())),
            Err(_) => {
                crate::metrics::QUEUE_BACKPRESSURE_TOTAL.inc();
                Err(AppError::Backpressure)
            }
        }
    }

    async fn pull(&self) -> Option<Delivery> {
        let delivery = self.inner.rx.lock().await.recv().await?;
        let depth = self.inner.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.inner.record_depth(depth);
        Some(delivery)
    }

    async fn ack(&self, _delivery: Delivery) {}

    async fn nack(&self, delivery: Delivery) {
        let Delivery { batch, attempt } = delivery;

        if attempt > self.inner.config.max_retries {
            tracing::warn!(
                batch_id = %batch.batch_id,
                spans = batch.spans.len(),
                attempts = attempt,
                "Batch exhausted retries, moving to dead-letter sink"
            );
            crate::metrics::QUEUE_DEAD_LETTERED_TOTAL.inc();
            self.inner.dead_letters.lock().push(batch);
            return;
        }

        let backoff = self.backoff(attempt);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;

            let redelivery = Delivery {
                batch,
                attempt: attempt + 1,
            };
            // Redelivery must not be lost to backpressure: wait for room
            if inner.tx.send(redelivery).await.is_err() {
                tracing::error!("Queue closed while requeueing nacked batch");
                return;
            }
            let depth = inner.depth.fetch_add(1, Ordering::SeqCst) + 1;
            inner.record_depth(depth);
        });
    }

    fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }
}
