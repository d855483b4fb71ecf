use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::ingest::receiver::{IngestOutcome, IngestRequest};
use crate::models::{
    AlertSeverity, AlertStatus, AlertType, Environment, Span, SpanStatus,
};
use crate::query::{
    default_range, BreakdownDimension, Granularity, SpanNode, DEFAULT_BREAKDOWN_LIMIT,
};
use crate::store::{AlertFilter, SpanFilter};

/// Resolve the caller's customer from the bearer credential.
///
/// Registered keys map through the api_keys table; an unregistered key is
/// its own customer id (the auth middleware proper is an external
/// collaborator).
async fn resolve_customer(state: &AppState, headers: &HeaderMap) -> Result<String> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Authentication("missing bearer token".to_string()))?;

    match state.store.lookup_customer(token).await? {
        Some(customer_id) => Ok(customer_id),
        None => Ok(token.to_string()),
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: fails when the store is unreachable
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    state.store.ping().await?;
    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Prometheus metrics endpoint
pub async fn metrics() -> (StatusCode, String) {
    (StatusCode::OK, crate::metrics::gather_metrics())
}

/// `POST /v1/traces` — validate, rate-limit, enqueue. Always 202 with the
/// per-span outcome list.
pub async fn ingest_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestOutcome>)> {
    let customer_id = resolve_customer(&state, &headers).await?;
    let outcome = state.receiver.ingest(&customer_id, request).await;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// `GET /api/traces` — filtered span listing
pub async fn list_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListTracesQuery>,
) -> Result<Json<ListTracesResponse>> {
    let customer_id = resolve_customer(&state, &headers).await?;

    let filter = SpanFilter {
        customer_id: Some(customer_id),
        service_name: params.service,
        endpoint: params.endpoint,
        model: params.model,
        status: params.status,
        environment: params.environment,
        start_time: params.start_time,
        end_time: params.end_time,
    };

    let limit = params.limit.unwrap_or(100);
    let offset = params.offset.unwrap_or(0);
    let (spans, total) = state.query.list_spans(&filter, limit, offset).await?;

    Ok(Json(ListTracesResponse {
        data: spans,
        pagination: Pagination {
            total,
            limit: limit.min(crate::query::MAX_PAGE_LIMIT),
            offset,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListTracesQuery {
    pub service: Option<String>,
    pub model: Option<String>,
    pub status: Option<SpanStatus>,
    pub endpoint: Option<String>,
    pub environment: Option<Environment>,
    #[serde(rename = "startTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListTracesResponse {
    pub data: Vec<Span>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// `GET /api/traces/:trace_id` — hierarchical trace view
pub async fn get_trace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceResponse>> {
    let customer_id = resolve_customer(&state, &headers).await?;

    let tree = state
        .query
        .get_trace(Some(&customer_id), &trace_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Trace {} not found", trace_id)))?;

    Ok(Json(TraceResponse { trace: tree }))
}

#[derive(Debug, Serialize)]
pub struct TraceResponse {
    pub trace: SpanNode,
}

/// `GET /api/traces/batch?ids=t1,t2` — replay-engine tree fetch
pub async fn get_traces_by_ids(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TraceBatchQuery>,
) -> Result<Json<TraceBatchResponse>> {
    let customer_id = resolve_customer(&state, &headers).await?;

    let ids: Vec<String> = params
        .ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();
    if ids.is_empty() {
        return Err(AppError::Validation("ids must not be empty".to_string()));
    }

    let traces = state
        .query
        .get_traces_by_ids(Some(&customer_id), &ids)
        .await?;
    Ok(Json(TraceBatchResponse { traces }))
}

#[derive(Debug, Deserialize)]
pub struct TraceBatchQuery {
    pub ids: String,
}

#[derive(Debug, Serialize)]
pub struct TraceBatchResponse {
    pub traces: Vec<SpanNode>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(rename = "startTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    pub end_time: Option<DateTime<Utc>>,
    pub granularity: Option<Granularity>,
    pub dimension: Option<BreakdownDimension>,
    pub service: Option<String>,
    pub endpoint: Option<String>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    fn range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let (default_start, default_end) = default_range();
        (
            self.start_time.unwrap_or(default_start),
            self.end_time.unwrap_or(default_end),
        )
    }
}

/// `GET /api/analytics/timeline`
pub async fn timeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>> {
    let customer_id = resolve_customer(&state, &headers).await?;
    let (start, end) = params.range();

    let data = state
        .query
        .timeline(
            &customer_id,
            start,
            end,
            params.granularity.unwrap_or_default(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "data": data })))
}

/// `GET /api/analytics/breakdown`
pub async fn breakdown(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>> {
    let customer_id = resolve_customer(&state, &headers).await?;
    let dimension = params
        .dimension
        .ok_or_else(|| AppError::Validation("dimension is required".to_string()))?;
    let (start, end) = params.range();

    let data = state
        .query
        .breakdown(
            &customer_id,
            dimension,
            start,
            end,
            params.limit.unwrap_or(DEFAULT_BREAKDOWN_LIMIT),
        )
        .await?;
    Ok(Json(serde_json::json!({ "data": data })))
}

/// `GET /api/analytics/percentiles`
pub async fn percentiles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeQuery>,
) -> Result<Json<crate::query::PercentileReport>> {
    let customer_id = resolve_customer(&state, &headers).await?;
    let (start, end) = params.range();

    let report = state
        .query
        .percentiles(
            &customer_id,
            params.service.clone(),
            params.endpoint.clone(),
            start,
            end,
        )
        .await?;
    Ok(Json(report))
}

/// `GET /api/analytics/summary`
pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeQuery>,
) -> Result<Json<crate::query::SummaryReport>> {
    let customer_id = resolve_customer(&state, &headers).await?;
    let (start, end) = params.range();

    let report = state.query.summary(&customer_id, start, end).await?;
    Ok(Json(report))
}

/// `GET /api/alerts`
pub async fn list_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListAlertsQuery>,
) -> Result<Json<serde_json::Value>> {
    let customer_id = resolve_customer(&state, &headers).await?;

    let filter = AlertFilter {
        customer_id: Some(customer_id),
        statuses: params.status.into_iter().collect(),
        severities: params.severity.into_iter().collect(),
        alert_types: params.alert_type.into_iter().collect(),
        created_before: None,
        limit: Some(params.limit.unwrap_or(100)),
    };

    let alerts = state.store.list_alerts(&filter).await?;
    Ok(Json(serde_json::json!({ "data": alerts })))
}

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    #[serde(rename = "alertType")]
    pub alert_type: Option<AlertType>,
    pub limit: Option<u32>,
}

/// `POST /api/alerts/:alert_id/status` — state-machine transition.
/// Transitions out of `resolved` answer 409.
pub async fn update_alert_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
    Json(request): Json<UpdateAlertStatusRequest>,
) -> Result<Json<crate::models::Alert>> {
    let customer_id = resolve_customer(&state, &headers).await?;

    let mut alert = state
        .store
        .get_alert(&alert_id)
        .await?
        .filter(|alert| alert.customer_id == customer_id)
        .ok_or_else(|| AppError::NotFound(format!("Alert {} not found", alert_id)))?;

    alert.transition(request.status)?;
    state.store.update_alert(&alert).await?;

    tracing::info!(
        alert_id = %alert_id,
        new_status = %alert.status,
        "Alert status updated"
    );
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertStatusRequest {
    pub status: AlertStatus,
}
