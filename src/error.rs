//! Error taxonomy for the trace observability core.
//!
//! Every failure belongs to one of four propagation classes: input faults
//! are reported to the caller (per-span in the ingest response, as a JSON
//! envelope on the query side) and never retried server-side; transient
//! store faults are retried by the worker and eventually dead-lettered;
//! degraded conditions never surface here at all (they fall back and log);
//! fatal conditions abort boot or fail the readiness probe.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    // Input faults: the caller sent something the core will never accept.
    /// A request or span failed validation
    #[error("invalid input: {0}")]
    Validation(String),

    /// Bearer credential missing or unusable
    #[error("unauthenticated: {0}")]
    Authentication(String),

    /// The customer's daily span quota is spent until UTC midnight
    #[error("daily trace quota exhausted")]
    QuotaExceeded,

    /// Span, trace, alert, or baseline lookup came back empty
    #[error("not found: {0}")]
    NotFound(String),

    /// The alert state machine rejected a transition (resolved is terminal)
    #[error("state machine rejected transition: {0}")]
    InvalidStateTransition(String),

    // Transient faults: worth retrying, within bounds.
    /// The ingest queue is past its high-water mark; callers should back off
    #[error("ingest queue at capacity")]
    Backpressure,

    /// Store round-trip failed; the worker may redeliver the batch
    #[error("store failure: {0}")]
    Database(String),

    /// An external I/O deadline elapsed
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    // Fatal-leaning faults: misbuilt state rather than bad traffic.
    /// Reading a config or pricing file from disk failed
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A row or payload refused to encode or decode
    #[error("encoding failure: {0}")]
    Serialization(String),

    /// The loaded configuration is unusable
    #[error("bad configuration: {0}")]
    Configuration(String),

    /// A bug surfaced; nothing the caller can do about it
    #[error("internal failure: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and stable wire code, decided together so the two can
    /// never drift apart.
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR"),
            AppError::QuotaExceeded => (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::InvalidStateTransition(_) => {
                (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
            }
            AppError::Backpressure => (StatusCode::SERVICE_UNAVAILABLE, "BACKPRESSURE"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, "TIMEOUT"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            AppError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            AppError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    pub fn error_code(&self) -> &'static str {
        self.classify().1
    }

    /// Whether a worker retry could plausibly succeed. Everything else is
    /// either the caller's fault or permanently broken.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Timeout(_) | AppError::Io(_)
        )
    }
}

/// Wire shape of a failed query-side request: `{ "error": { code, message,
/// status } }`, matching what the dashboard expects.
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    status: u16,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = self.to_string();

        // Server faults are our problem; rejected traffic is only worth
        // debug noise
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        } else {
            tracing::debug!(code, http_status = status.as_u16(), %message, "request rejected");
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code,
                message,
                status: status.as_u16(),
            },
        };
        (status, Json(envelope)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(format!("json: {}", err))
    }
}

/// Constraint violations become non-transient validation errors so the
/// worker drops the offending span instead of retrying the batch.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => AppError::Validation(db.to_string()),
                _ => AppError::Database(db.to_string()),
            },
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Crate-wide result shorthand
pub type Result<T, E = AppError> = std::result::Result<T, E>;
