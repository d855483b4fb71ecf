use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AnomalyConfig;
use crate::error::Result;
use crate::models::{
    Alert, AlertSeverity, AlertType, BaselineWindow, Span,
};
use crate::store::TraceStore;

use super::engine::BaselineEngine;

/// Distinct response hashes tracked per (service, endpoint) partition
const MODAL_HASH_CAP: usize = 256;

/// Frequency tracker for recent response hashes, used to derive the modal
/// response a span is compared against when no external scorer is available.
struct ModalHashTracker {
    partitions: DashMap<(String, String), Mutex<HashMap<String, usize>>>,
}

impl ModalHashTracker {
    fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    /// Most frequent hash and the total recorded support for the partition
    fn modal(&self, service_name: &str, endpoint: &str) -> Option<(String, usize)> {
        let key = (service_name.to_string(), endpoint.to_string());
        let partition = self.partitions.get(&key)?;
        let counts = partition.lock();

        let total: usize = counts.values().sum();
        counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(hash, _)| (hash.clone(), total))
    }

    fn record(&self, service_name: &str, endpoint: &str, hash: &str) {
        let key = (service_name.to_string(), endpoint.to_string());
        let partition = self
            .partitions
            .entry(key)
            .or_insert_with(|| Mutex::new(HashMap::new()));

        let mut counts = partition.lock();
        if counts.len() >= MODAL_HASH_CAP && !counts.contains_key(hash) {
            // Bounded: evict the rarest hash before admitting a new one
            if let Some(rarest) = counts
                .iter()
                .min_by_key(|(_, count)| **count)
                .map(|(h, _)| h.clone())
            {
                counts.remove(&rarest);
            }
        }
        *counts.entry(hash.to_string()).or_insert(0) += 1;
    }
}

type DedupKey = (String, String, String, AlertType);

/// Classifies spans against their baselines and emits deduplicated alerts.
///
/// Evaluation runs after persistence; the span already carries enrichment
/// results and any scorer-provided quality evidence.
pub struct AnomalyDetector {
    store: Arc<dyn TraceStore>,
    engine: Arc<BaselineEngine>,
    modal: ModalHashTracker,
    /// Last-minute alert index; one short-lived lock, store lookup on miss
    dedup: Mutex<HashMap<DedupKey, (chrono::DateTime<Utc>, Uuid)>>,
    modal_min_support: usize,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(
        store: Arc<dyn TraceStore>,
        engine: Arc<BaselineEngine>,
        modal_min_support: usize,
        config: AnomalyConfig,
    ) -> Self {
        Self {
            store,
            engine,
            modal: ModalHashTracker::new(),
            dedup: Mutex::new(HashMap::new()),
            modal_min_support,
            config,
        }
    }

    /// Evaluate one persisted span. Returns the emitted alert, or None when
    /// the span is normal or a duplicate was suppressed.
    pub async fn evaluate(&self, span: &Span) -> Result<Option<Alert>> {
        let quality = self.quality_evidence(span);

        // Record after comparison so a span cannot shift the mode it is
        // being judged against
        if let Some(ref hash) = span.response_hash {
            self.modal.record(&span.service_name, &span.endpoint, hash);
        }

        let baseline = self
            .engine
            .current(
                &span.service_name,
                &span.endpoint,
                BaselineWindow::TwentyFourHours,
            )
            .await?;

        let (cost_spike, latency_spike, p95_cost, p95_latency) = match baseline {
            Some(ref b) => (
                b.p95_cost > 0.0 && span.cost_usd > self.config.cost_spike_multiplier * b.p95_cost,
                b.p95_latency > 0.0
                    && span.latency_ms > self.config.latency_spike_multiplier * b.p95_latency,
                b.p95_cost,
                b.p95_latency,
            ),
            // No baseline yet: cost/latency classification skipped
            None => (false, false, 0.0, 0.0),
        };

        let quality_drop = quality.is_drop(&self.config);

        // First matching rule, in table order
        let alert_type = match (cost_spike, quality_drop, latency_spike) {
            (true, true, _) => AlertType::CostAndQuality,
            (true, false, _) => AlertType::CostSpike,
            (false, _, true) => AlertType::LatencySpike,
            (false, true, false) => AlertType::QualityDrop,
            _ => return Ok(None),
        };

        let severity = match alert_type {
            AlertType::CostSpike | AlertType::CostAndQuality => {
                ratio_severity(span.cost_usd, p95_cost)
            }
            AlertType::LatencySpike => ratio_severity(span.latency_ms, p95_latency),
            AlertType::QualityDrop => quality.severity(),
        };

        let mut alert = Alert::new(
            span.trace_id.clone(),
            span.span_id.clone(),
            span.customer_id.clone(),
            span.service_name.clone(),
            span.endpoint.clone(),
            alert_type,
            severity,
        );
        alert.current_cost = span.cost_usd;
        alert.baseline_cost = p95_cost;
        alert.cost_increase_percent = if p95_cost > 0.0 {
            (span.cost_usd - p95_cost) / p95_cost * 100.0
        } else {
            0.0
        };
        alert.semantic_score = quality.semantic_score;
        alert.hash_similarity = quality.hash_similarity;
        alert.scoring_method = quality.method();
        alert.reasoning = self.reasoning(span, alert_type, p95_cost, p95_latency, &quality);

        if let Some(existing_id) = self.find_duplicate(&alert).await? {
            self.suppress(&existing_id).await?;
            tracing::debug!(
                alert_id = %existing_id,
                service_name = %alert.service_name,
                endpoint = %alert.endpoint,
                alert_type = %alert.alert_type,
                "Duplicate alert suppressed"
            );
            return Ok(None);
        }

        self.store.insert_alert(&alert).await?;
        self.remember(&alert);
        crate::metrics::ALERTS_EMITTED_TOTAL
            .with_label_values(&[
                alert.alert_type.to_string().as_str(),
                alert.severity.to_string().as_str(),
            ])
            .inc();

        tracing::info!(
            alert_id = %alert.alert_id,
            trace_id = %alert.trace_id,
            span_id = %alert.span_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "Alert emitted"
        );

        Ok(Some(alert))
    }

    fn quality_evidence(&self, span: &Span) -> QualityEvidence {
        // Scorer-provided similarity wins; otherwise compare the span's own
        // fingerprint against the modal response for its endpoint
        let hash_similarity = span.hash_similarity.or_else(|| {
            let hash = span.response_hash.as_deref()?;
            let (modal_hash, support) = self.modal.modal(&span.service_name, &span.endpoint)?;
            if support < self.modal_min_support {
                return None;
            }
            Some(if modal_hash == hash { 1.0 } else { 0.0 })
        });

        QualityEvidence {
            semantic_score: span.semantic_score,
            hash_similarity,
        }
    }

    async fn find_duplicate(&self, alert: &Alert) -> Result<Option<Uuid>> {
        let window = Duration::seconds(self.config.dedup_window_secs as i64);
        let now = Utc::now();
        let key = (
            alert.customer_id.clone(),
            alert.service_name.clone(),
            alert.endpoint.clone(),
            alert.alert_type,
        );

        {
            let mut index = self.dedup.lock();
            index.retain(|_, (at, _)| now - *at <= window);
            if let Some((_, existing_id)) = index.get(&key) {
                return Ok(Some(*existing_id));
            }
        }

        // Cache miss: consult the store (covers multi-process deployments)
        let existing = self
            .store
            .find_recent_alert(
                &alert.customer_id,
                &alert.service_name,
                &alert.endpoint,
                alert.alert_type,
                now - window,
            )
            .await?;

        if let Some(ref found) = existing {
            self.dedup
                .lock()
                .insert(key, (found.created_at, found.alert_id));
        }
        Ok(existing.map(|a| a.alert_id))
    }

    async fn suppress(&self, alert_id: &Uuid) -> Result<()> {
        if let Some(mut existing) = self.store.get_alert(alert_id).await? {
            existing.suppressed_count += 1;
            self.store.update_alert(&existing).await?;
            crate::metrics::ALERTS_SUPPRESSED_TOTAL.inc();
        }
        Ok(())
    }

    fn remember(&self, alert: &Alert) {
        let key = (
            alert.customer_id.clone(),
            alert.service_name.clone(),
            alert.endpoint.clone(),
            alert.alert_type,
        );
        self.dedup.lock().insert(key, (alert.created_at, alert.alert_id));
    }

    fn reasoning(
        &self,
        span: &Span,
        alert_type: AlertType,
        p95_cost: f64,
        p95_latency: f64,
        quality: &QualityEvidence,
    ) -> String {
        match alert_type {
            AlertType::CostSpike => format!(
                "Cost ${:.6} exceeds {}x the 24h P95 baseline ${:.6}",
                span.cost_usd, self.config.cost_spike_multiplier, p95_cost
            ),
            AlertType::LatencySpike => format!(
                "Latency {:.0}ms exceeds {}x the 24h P95 baseline {:.0}ms",
                span.latency_ms, self.config.latency_spike_multiplier, p95_latency
            ),
            AlertType::QualityDrop => format!(
                "Response diverges from the expected output (semantic_score: {}, hash_similarity: {})",
                quality
                    .semantic_score
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "n/a".to_string()),
                quality
                    .hash_similarity
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            AlertType::CostAndQuality => format!(
                "Cost ${:.6} exceeds {}x the 24h P95 baseline ${:.6} and the response diverges from the expected output",
                span.cost_usd, self.config.cost_spike_multiplier, p95_cost
            ),
        }
    }
}

/// Cost/latency severity ladder: LOW up to 3x the baseline, MEDIUM up to 5x,
/// HIGH beyond
fn ratio_severity(current: f64, baseline: f64) -> AlertSeverity {
    if baseline <= 0.0 {
        return AlertSeverity::Low;
    }
    let ratio = current / baseline;
    if ratio > 5.0 {
        AlertSeverity::High
    } else if ratio > 3.0 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

struct QualityEvidence {
    semantic_score: Option<f64>,
    hash_similarity: Option<f64>,
}

impl QualityEvidence {
    fn is_drop(&self, config: &AnomalyConfig) -> bool {
        self.semantic_score
            .map(|s| s < config.semantic_score_floor)
            .unwrap_or(false)
            || self
                .hash_similarity
                .map(|h| h < config.hash_similarity_floor)
                .unwrap_or(false)
    }

    /// Quality-only severity from the score magnitude
    fn severity(&self) -> AlertSeverity {
        let score = self.semantic_score.or(self.hash_similarity).unwrap_or(0.0);
        if score >= 0.8 {
            AlertSeverity::Low
        } else if score < 0.5 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        }
    }

    fn method(&self) -> crate::models::ScoringMethod {
        use crate::models::ScoringMethod;
        match (self.semantic_score.is_some(), self.hash_similarity.is_some()) {
            (true, true) => ScoringMethod::Both,
            (true, false) => ScoringMethod::Semantic,
            _ => ScoringMethod::HashOnly,
        }
    }
}
