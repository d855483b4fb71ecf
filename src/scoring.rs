//! External semantic-scorer hook.
//!
//! Quality scoring is supplied by an external collaborator. The core only
//! defines the seam: a scorer may be injected into the worker pool, and its
//! absence degrades classification to hash-only evidence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Span;

/// Outcome of scoring one span against its endpoint's expected responses
#[derive(Debug, Clone, Copy)]
pub struct ScoreOutcome {
    /// Semantic similarity in [0, 1]; lower means further from expected
    pub semantic_score: Option<f64>,

    /// Fingerprint similarity in [0, 1] against the modal response
    pub hash_similarity: Option<f64>,

    /// Whether the scorer answered from its own cache
    pub cached: bool,

    pub scored_at: DateTime<Utc>,
}

/// Hook implemented by an external quality scorer.
///
/// `score` returning `Ok(None)` means the scorer declined this span (e.g.
/// no reference responses yet); classification then falls back to the
/// worker's own hash comparison.
#[async_trait]
pub trait SemanticScorer: Send + Sync {
    async fn score(&self, span: &Span) -> Result<Option<ScoreOutcome>>;
}
