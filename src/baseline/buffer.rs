use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::models::BaselineWindow;

/// One accepted observation for a (service, endpoint) partition
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub cost_usd: f64,
    pub latency_ms: f64,
}

/// Bounded rolling sample buffer for one partition.
///
/// Holds the most recent `capacity` samples; entries older than the widest
/// baseline window are rejected on insert and trimmed on read.
#[derive(Debug)]
struct PartitionBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    /// New samples since the last percentile recompute
    delta: usize,
}

impl PartitionBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            delta: 0,
        }
    }

    fn record(&mut self, sample: Sample, now: DateTime<Utc>) -> bool {
        if now - sample.at > BaselineWindow::widest().duration() {
            return false;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.delta += 1;
        true
    }

    /// Copy out samples inside the window. Sorting happens on the copy so
    /// the partition mutex is never held across a sort.
    fn snapshot(&self, window: BaselineWindow, now: DateTime<Utc>) -> Vec<Sample> {
        let horizon = now - window.duration();
        self.samples
            .iter()
            .filter(|s| s.at >= horizon)
            .copied()
            .collect()
    }
}

/// Sample buffers partitioned by (service, endpoint), each behind its own
/// mutex. The only shared mutable state of the worker pool.
pub struct BaselineBuffers {
    partitions: DashMap<(String, String), Mutex<PartitionBuffer>>,
    capacity: usize,
}

impl BaselineBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            partitions: DashMap::new(),
            capacity,
        }
    }

    /// Record a sample; returns the partition's new-sample count since the
    /// last recompute (the update-delta trigger input).
    pub fn record(&self, service_name: &str, endpoint: &str, sample: Sample) -> usize {
        let key = (service_name.to_string(), endpoint.to_string());
        let partition = self
            .partitions
            .entry(key)
            .or_insert_with(|| Mutex::new(PartitionBuffer::new(self.capacity)));

        let mut guard = partition.lock();
        guard.record(sample, Utc::now());
        guard.delta
    }

    /// Snapshot one partition's samples for a window
    pub fn snapshot(
        &self,
        service_name: &str,
        endpoint: &str,
        window: BaselineWindow,
        now: DateTime<Utc>,
    ) -> Vec<Sample> {
        let key = (service_name.to_string(), endpoint.to_string());
        match self.partitions.get(&key) {
            Some(partition) => partition.lock().snapshot(window, now),
            None => Vec::new(),
        }
    }

    /// Clear a partition's delta counter after a recompute
    pub fn reset_delta(&self, service_name: &str, endpoint: &str) {
        let key = (service_name.to_string(), endpoint.to_string());
        if let Some(partition) = self.partitions.get(&key) {
            partition.lock().delta = 0;
        }
    }

    /// All partition keys currently held
    pub fn keys(&self) -> Vec<(String, String)> {
        self.partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
