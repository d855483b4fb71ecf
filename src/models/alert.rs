use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A persisted anomaly classification requiring operator attention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier
    pub alert_id: Uuid,

    /// Triggering span
    pub trace_id: String,
    pub span_id: String,

    /// Tenant scope
    pub customer_id: String,

    /// Scope the baseline was matched on
    pub service_name: String,
    pub endpoint: String,

    pub alert_type: AlertType,
    pub severity: AlertSeverity,

    /// Evidence
    pub current_cost: f64,
    pub baseline_cost: f64,
    pub cost_increase_percent: f64,
    pub hash_similarity: Option<f64>,
    pub semantic_score: Option<f64>,
    pub scoring_method: ScoringMethod,

    /// Human-readable explanation of the classification
    pub reasoning: String,

    pub status: AlertStatus,

    /// Duplicates suppressed onto this alert within the dedup window
    pub suppressed_count: u32,

    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trace_id: String,
        span_id: String,
        customer_id: String,
        service_name: String,
        endpoint: String,
        alert_type: AlertType,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            trace_id,
            span_id,
            customer_id,
            service_name,
            endpoint,
            alert_type,
            severity,
            current_cost: 0.0,
            baseline_cost: 0.0,
            cost_increase_percent: 0.0,
            hash_similarity: None,
            semantic_score: None,
            scoring_method: ScoringMethod::HashOnly,
            reasoning: String::new(),
            status: AlertStatus::Pending,
            suppressed_count: 0,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    /// Apply a state-machine transition, stamping the transition time.
    ///
    /// `resolved` is terminal; any transition out of it is rejected.
    pub fn transition(&mut self, next: AlertStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "alert {} cannot move from {} to {}",
                self.alert_id, self.status, next
            )));
        }

        self.status = next;
        match next {
            AlertStatus::Acknowledged => self.acknowledged_at = Some(Utc::now()),
            AlertStatus::Resolved => self.resolved_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, AlertStatus::Pending | AlertStatus::Sent)
    }
}

/// Classification type of an alert
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    CostSpike,
    LatencySpike,
    QualityDrop,
    CostAndQuality,
}

/// Operator-facing severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

/// How the quality evidence was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoringMethod {
    HashOnly,
    Semantic,
    Both,
}

/// Alert lifecycle state
///
/// ```text
///   pending ──notify──► sent ──operator──► acknowledged ──operator──► resolved
///      │                                        │
///      └─────────────auto-expire (24h)──────────┴──► resolved
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Sent,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Resolved)
                | (Sent, Acknowledged)
                | (Sent, Resolved)
                | (Acknowledged, Resolved)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == AlertStatus::Resolved
    }
}
