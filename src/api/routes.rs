use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the ingest-side router (RECEIVER_PORT)
pub fn build_receiver_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/v1/traces", post(handlers::ingest_traces))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Build the read-side router (QUERY_PORT)
pub fn build_query_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Span queries
        .route("/api/traces", get(handlers::list_traces))
        .route("/api/traces/batch", get(handlers::get_traces_by_ids))
        .route("/api/traces/:trace_id", get(handlers::get_trace))
        // Analytics
        .route("/api/analytics/timeline", get(handlers::timeline))
        .route("/api/analytics/breakdown", get(handlers::breakdown))
        .route("/api/analytics/percentiles", get(handlers::percentiles))
        .route("/api/analytics/summary", get(handlers::summary))
        // Alert management
        .route("/api/alerts", get(handlers::list_alerts))
        .route("/api/alerts/:alert_id/status", post(handlers::update_alert_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
