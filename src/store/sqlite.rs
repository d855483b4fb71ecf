use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Alert, AlertSeverity, AlertStatus, AlertType, BaselineWindow, CostBaseline, Environment,
    Provider, ScoringMethod, Span, SpanKey, SpanStatus,
};
use crate::store::{AlertFilter, SpanFilter, TraceStore};

/// Relational trace store backed by SQLite.
///
/// Schema bootstrap runs at connect time; migration mechanics beyond that
/// are deployment concerns. Foreign keys are enabled per connection so
/// retention deletes cascade into alerts and replay results.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::Configuration(format!("store url: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.bootstrap_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bootstrap_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn push_span_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SpanFilter) {
        if let Some(ref customer) = filter.customer_id {
            qb.push(" AND customer_id = ").push_bind(customer.clone());
        }
        if let Some(ref service) = filter.service_name {
            qb.push(" AND service_name = ").push_bind(service.clone());
        }
        if let Some(ref endpoint) = filter.endpoint {
            // Prefix match; escape LIKE metacharacters in the user value
            let prefix = endpoint.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            qb.push(" AND endpoint LIKE ")
                .push_bind(format!("{}%", prefix))
                .push(" ESCAPE '\\'");
        }
        if let Some(ref model) = filter.model {
            qb.push(" AND model = ").push_bind(model.clone());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.to_string());
        }
        if let Some(environment) = filter.environment {
            qb.push(" AND environment = ").push_bind(environment.to_string());
        }
        if let Some(start) = filter.start_time {
            qb.push(" AND timestamp >= ").push_bind(start);
        }
        if let Some(end) = filter.end_time {
            qb.push(" AND timestamp <= ").push_bind(end);
        }
    }
}

#[async_trait]
impl TraceStore for SqliteStore {
    async fn upsert_span(&self, span: &Span) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO spans (
                trace_id, span_id, parent_span_id, customer_id, service_name,
                endpoint, environment, timestamp, latency_ms, model, provider,
                prompt, response, prompt_tokens, completion_tokens, tokens,
                cost_usd, response_hash, semantic_score, hash_similarity,
                semantic_scored_at, semantic_cached, metadata, tags, status,
                error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (trace_id, span_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                latency_ms = excluded.latency_ms,
                status = excluded.status
            "#,
        )
        .bind(&span.trace_id)
        .bind(&span.span_id)
        .bind(&span.parent_span_id)
        .bind(&span.customer_id)
        .bind(&span.service_name)
        .bind(&span.endpoint)
        .bind(span.environment.to_string())
        .bind(span.timestamp)
        .bind(span.latency_ms)
        .bind(&span.model)
        .bind(span.provider.to_string())
        .bind(&span.prompt)
        .bind(&span.response)
        .bind(span.prompt_tokens)
        .bind(span.completion_tokens)
        .bind(span.tokens)
        .bind(span.cost_usd)
        .bind(&span.response_hash)
        .bind(span.semantic_score)
        .bind(span.hash_similarity)
        .bind(span.semantic_scored_at)
        .bind(span.semantic_cached)
        .bind(serde_json::to_string(&span.metadata)?)
        .bind(serde_json::to_string(&span.tags)?)
        .bind(span.status.to_string())
        .bind(&span.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_span(&self, key: &SpanKey) -> Result<Option<Span>> {
        let row = sqlx::query("SELECT * FROM spans WHERE trace_id = ? AND span_id = ?")
            .bind(&key.trace_id)
            .bind(&key.span_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_span(&r)).transpose()
    }

    async fn list_spans(&self, filter: &SpanFilter, limit: u32, offset: u32) -> Result<Vec<Span>> {
        let mut qb = QueryBuilder::new("SELECT * FROM spans WHERE 1 = 1");
        Self::push_span_filter(&mut qb, filter);
        qb.push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_span).collect()
    }

    async fn count_spans(&self, filter: &SpanFilter) -> Result<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS n FROM spans WHERE 1 = 1");
        Self::push_span_filter(&mut qb, filter);

        let row = qb.build().fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn get_trace_spans(&self, trace_id: &str) -> Result<Vec<Span>> {
        let rows = sqlx::query("SELECT * FROM spans WHERE trace_id = ?")
            .bind(trace_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_span).collect()
    }

    async fn get_traces_spans(&self, trace_ids: &[String]) -> Result<Vec<Span>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new("SELECT * FROM spans WHERE trace_id IN (");
        let mut separated = qb.separated(", ");
        for trace_id in trace_ids {
            separated.push_bind(trace_id.clone());
        }
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_span).collect()
    }

    async fn delete_spans_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // alerts and replay_results cascade via foreign keys
        let result = sqlx::query("DELETE FROM spans WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                alert_id, trace_id, span_id, customer_id, service_name,
                endpoint, alert_type, severity, current_cost, baseline_cost,
                cost_increase_percent, hash_similarity, semantic_score,
                scoring_method, reasoning, status, suppressed_count,
                created_at, acknowledged_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.alert_id.to_string())
        .bind(&alert.trace_id)
        .bind(&alert.span_id)
        .bind(&alert.customer_id)
        .bind(&alert.service_name)
        .bind(&alert.endpoint)
        .bind(alert.alert_type.to_string())
        .bind(alert.severity.to_string())
        .bind(alert.current_cost)
        .bind(alert.baseline_cost)
        .bind(alert.cost_increase_percent)
        .bind(alert.hash_similarity)
        .bind(alert.semantic_score)
        .bind(alert.scoring_method.to_string())
        .bind(&alert.reasoning)
        .bind(alert.status.to_string())
        .bind(alert.suppressed_count as i64)
        .bind(alert.created_at)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_alert(&self, alert_id: &Uuid) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE alert_id = ?")
            .bind(alert_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_alert(&r)).transpose()
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET
                status = ?, suppressed_count = ?, acknowledged_at = ?, resolved_at = ?
            WHERE alert_id = ?
            "#,
        )
        .bind(alert.status.to_string())
        .bind(alert.suppressed_count as i64)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_at)
        .bind(alert.alert_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Alert {} not found",
                alert.alert_id
            )));
        }
        Ok(())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut qb = QueryBuilder::new("SELECT * FROM alerts WHERE 1 = 1");

        if let Some(ref customer) = filter.customer_id {
            qb.push(" AND customer_id = ").push_bind(customer.clone());
        }
        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.to_string());
            }
            qb.push(")");
        }
        if !filter.severities.is_empty() {
            qb.push(" AND severity IN (");
            let mut separated = qb.separated(", ");
            for severity in &filter.severities {
                separated.push_bind(severity.to_string());
            }
            qb.push(")");
        }
        if !filter.alert_types.is_empty() {
            qb.push(" AND alert_type IN (");
            let mut separated = qb.separated(", ");
            for alert_type in &filter.alert_types {
                separated.push_bind(alert_type.to_string());
            }
            qb.push(")");
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(before);
        }

        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_alert).collect()
    }

    async fn find_recent_alert(
        &self,
        customer_id: &str,
        service_name: &str,
        endpoint: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE customer_id = ? AND service_name = ? AND endpoint = ?
              AND alert_type = ? AND created_at >= ?
              AND status IN ('pending', 'sent')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .bind(service_name)
        .bind(endpoint)
        .bind(alert_type.to_string())
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_alert(&r)).transpose()
    }

    async fn upsert_baseline(&self, baseline: &CostBaseline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cost_baselines (
                service_name, endpoint, window_size,
                p50_cost, p95_cost, p99_cost,
                p50_latency, p95_latency, p99_latency,
                sample_count, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (service_name, endpoint, window_size) DO UPDATE SET
                p50_cost = excluded.p50_cost,
                p95_cost = excluded.p95_cost,
                p99_cost = excluded.p99_cost,
                p50_latency = excluded.p50_latency,
                p95_latency = excluded.p95_latency,
                p99_latency = excluded.p99_latency,
                sample_count = excluded.sample_count,
                last_updated = excluded.last_updated
            WHERE excluded.last_updated >= cost_baselines.last_updated
            "#,
        )
        .bind(&baseline.service_name)
        .bind(&baseline.endpoint)
        .bind(baseline.window.to_string())
        .bind(baseline.p50_cost)
        .bind(baseline.p95_cost)
        .bind(baseline.p99_cost)
        .bind(baseline.p50_latency)
        .bind(baseline.p95_latency)
        .bind(baseline.p99_latency)
        .bind(baseline.sample_count as i64)
        .bind(baseline.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_baseline(
        &self,
        service_name: &str,
        endpoint: &str,
        window: BaselineWindow,
    ) -> Result<Option<CostBaseline>> {
        let row = sqlx::query(
            "SELECT * FROM cost_baselines WHERE service_name = ? AND endpoint = ? AND window_size = ?",
        )
        .bind(service_name)
        .bind(endpoint)
        .bind(window.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_baseline(&r)).transpose()
    }

    async fn delete_idle_baselines(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cost_baselines WHERE last_updated < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn lookup_customer(&self, api_key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT customer_id FROM api_keys WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(r) => Some(r.try_get::<String, _>("customer_id")?),
            None => None,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_enum<T: FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| AppError::Serialization(format!("invalid {} value: {}", what, raw)))
}

fn row_to_span(row: &SqliteRow) -> Result<Span> {
    let environment: String = row.try_get("environment")?;
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    let tags: String = row.try_get("tags")?;

    Ok(Span {
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        parent_span_id: row.try_get("parent_span_id")?,
        customer_id: row.try_get("customer_id")?,
        service_name: row.try_get("service_name")?,
        endpoint: row.try_get("endpoint")?,
        environment: parse_enum::<Environment>(&environment, "environment")?,
        timestamp: row.try_get("timestamp")?,
        latency_ms: row.try_get("latency_ms")?,
        model: row.try_get("model")?,
        provider: parse_enum::<Provider>(&provider, "provider")?,
        prompt: row.try_get("prompt")?,
        response: row.try_get("response")?,
        prompt_tokens: row.try_get("prompt_tokens")?,
        completion_tokens: row.try_get("completion_tokens")?,
        tokens: row.try_get("tokens")?,
        cost_usd: row.try_get("cost_usd")?,
        response_hash: row.try_get("response_hash")?,
        semantic_score: row.try_get("semantic_score")?,
        hash_similarity: row.try_get("hash_similarity")?,
        semantic_scored_at: row.try_get("semantic_scored_at")?,
        semantic_cached: row.try_get("semantic_cached")?,
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        status: parse_enum::<SpanStatus>(&status, "status")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_alert(row: &SqliteRow) -> Result<Alert> {
    let alert_id: String = row.try_get("alert_id")?;
    let alert_type: String = row.try_get("alert_type")?;
    let severity: String = row.try_get("severity")?;
    let scoring_method: String = row.try_get("scoring_method")?;
    let status: String = row.try_get("status")?;
    let suppressed_count: i64 = row.try_get("suppressed_count")?;

    Ok(Alert {
        alert_id: Uuid::parse_str(&alert_id)
            .map_err(|e| AppError::Serialization(format!("invalid alert_id: {}", e)))?,
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        customer_id: row.try_get("customer_id")?,
        service_name: row.try_get("service_name")?,
        endpoint: row.try_get("endpoint")?,
        alert_type: parse_enum::<AlertType>(&alert_type, "alert_type")?,
        severity: parse_enum::<AlertSeverity>(&severity, "severity")?,
        current_cost: row.try_get("current_cost")?,
        baseline_cost: row.try_get("baseline_cost")?,
        cost_increase_percent: row.try_get("cost_increase_percent")?,
        hash_similarity: row.try_get("hash_similarity")?,
        semantic_score: row.try_get("semantic_score")?,
        scoring_method: parse_enum::<ScoringMethod>(&scoring_method, "scoring_method")?,
        reasoning: row.try_get("reasoning")?,
        status: parse_enum::<AlertStatus>(&status, "status")?,
        suppressed_count: suppressed_count as u32,
        created_at: row.try_get("created_at")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn row_to_baseline(row: &SqliteRow) -> Result<CostBaseline> {
    let window: String = row.try_get("window_size")?;
    let sample_count: i64 = row.try_get("sample_count")?;

    Ok(CostBaseline {
        service_name: row.try_get("service_name")?,
        endpoint: row.try_get("endpoint")?,
        window: parse_enum::<BaselineWindow>(&window, "window_size")?,
        p50_cost: row.try_get("p50_cost")?,
        p95_cost: row.try_get("p95_cost")?,
        p99_cost: row.try_get("p99_cost")?,
        p50_latency: row.try_get("p50_latency")?,
        p95_latency: row.try_get("p95_latency")?,
        p99_latency: row.try_get("p99_latency")?,
        sample_count: sample_count as u64,
        last_updated: row.try_get("last_updated")?,
    })
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS spans (
        trace_id TEXT NOT NULL,
        span_id TEXT NOT NULL,
        parent_span_id TEXT,
        customer_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        environment TEXT NOT NULL,
        timestamp TIMESTAMP NOT NULL,
        latency_ms REAL NOT NULL,
        model TEXT NOT NULL,
        provider TEXT NOT NULL,
        prompt TEXT,
        response TEXT,
        prompt_tokens INTEGER,
        completion_tokens INTEGER,
        tokens INTEGER,
        cost_usd REAL NOT NULL DEFAULT 0,
        response_hash TEXT,
        semantic_score REAL,
        hash_similarity REAL,
        semantic_scored_at TIMESTAMP,
        semantic_cached INTEGER,
        metadata TEXT NOT NULL DEFAULT '{}',
        tags TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL,
        error_message TEXT,
        PRIMARY KEY (trace_id, span_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_spans_customer_time ON spans (customer_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_spans_customer_service ON spans (customer_id, service_name)",
    "CREATE INDEX IF NOT EXISTS idx_spans_customer_status ON spans (customer_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_spans_model ON spans (model)",
    "CREATE INDEX IF NOT EXISTS idx_spans_provider ON spans (provider)",
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        alert_id TEXT PRIMARY KEY,
        trace_id TEXT NOT NULL,
        span_id TEXT NOT NULL,
        customer_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        current_cost REAL NOT NULL DEFAULT 0,
        baseline_cost REAL NOT NULL DEFAULT 0,
        cost_increase_percent REAL NOT NULL DEFAULT 0,
        hash_similarity REAL,
        semantic_score REAL,
        scoring_method TEXT NOT NULL,
        reasoning TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        suppressed_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL,
        acknowledged_at TIMESTAMP,
        resolved_at TIMESTAMP,
        FOREIGN KEY (trace_id, span_id)
            REFERENCES spans (trace_id, span_id)
            ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alerts_dedup ON alerts (customer_id, service_name, endpoint, alert_type, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts (status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS replay_results (
        replay_id TEXT PRIMARY KEY,
        replay_set_id TEXT NOT NULL,
        trace_id TEXT NOT NULL,
        span_id TEXT NOT NULL,
        payload TEXT,
        created_at TIMESTAMP NOT NULL,
        FOREIGN KEY (trace_id, span_id)
            REFERENCES spans (trace_id, span_id)
            ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cost_baselines (
        service_name TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        window_size TEXT NOT NULL,
        p50_cost REAL NOT NULL DEFAULT 0,
        p95_cost REAL NOT NULL DEFAULT 0,
        p99_cost REAL NOT NULL DEFAULT 0,
        p50_latency REAL NOT NULL DEFAULT 0,
        p95_latency REAL NOT NULL DEFAULT 0,
        p99_latency REAL NOT NULL DEFAULT 0,
        sample_count INTEGER NOT NULL DEFAULT 0,
        last_updated TIMESTAMP NOT NULL,
        PRIMARY KEY (service_name, endpoint, window_size)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        api_key TEXT PRIMARY KEY,
        customer_id TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertSeverity, AlertType};
    use chrono::Duration;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", 2).await.unwrap()
    }

    fn span(trace_id: &str, span_id: &str, ts: DateTime<Utc>) -> Span {
        Span {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: None,
            customer_id: "cust-1".to_string(),
            service_name: "svc".to_string(),
            endpoint: "/chat".to_string(),
            environment: Environment::Live,
            timestamp: ts,
            latency_ms: 120.0,
            model: "gpt-4".to_string(),
            provider: Provider::Openai,
            prompt: Some("hi".to_string()),
            response: Some("hello there".to_string()),
            prompt_tokens: Some(10),
            completion_tokens: Some(4),
            tokens: Some(14),
            cost_usd: 0.00054,
            response_hash: Some(Span::fingerprint_response("hello there")),
            semantic_score: None,
            hash_similarity: None,
            semantic_scored_at: None,
            semantic_cached: None,
            metadata: serde_json::json!({"region": "us-east-1"}),
            tags: vec!["prod".to_string()],
            status: SpanStatus::Success,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_span_roundtrip() {
        let store = store().await;
        let original = span("t1", "s1", Utc::now());

        store.upsert_span(&original).await.unwrap();
        let loaded = store
            .get_span(&SpanKey::new("t1", "s1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.trace_id, original.trace_id);
        assert_eq!(loaded.provider, Provider::Openai);
        assert_eq!(loaded.metadata["region"], "us-east-1");
        assert_eq!(loaded.tags, vec!["prod".to_string()]);
        assert_eq!(loaded.response_hash, original.response_hash);
    }

    #[tokio::test]
    async fn test_upsert_conflict_policy() {
        let store = store().await;
        let now = Utc::now();

        store.upsert_span(&span("t1", "s1", now)).await.unwrap();

        let mut correction = span("t1", "s1", now);
        correction.latency_ms = 999.0;
        correction.status = SpanStatus::Error;
        correction.cost_usd = 42.0;
        store.upsert_span(&correction).await.unwrap();

        let loaded = store
            .get_span(&SpanKey::new("t1", "s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.latency_ms, 999.0);
        assert_eq!(loaded.status, SpanStatus::Error);
        assert_eq!(loaded.cost_usd, 0.00054);
    }

    #[tokio::test]
    async fn test_endpoint_prefix_filter() {
        let store = store().await;
        let now = Utc::now();

        let mut a = span("t1", "s1", now);
        a.endpoint = "/chat/completions".to_string();
        let mut b = span("t1", "s2", now);
        b.endpoint = "/embed".to_string();
        store.upsert_span(&a).await.unwrap();
        store.upsert_span(&b).await.unwrap();

        let filter = SpanFilter {
            endpoint: Some("/chat".to_string()),
            ..Default::default()
        };
        let spans = store.list_spans(&filter, 10, 0).await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].endpoint, "/chat/completions");
    }

    #[tokio::test]
    async fn test_retention_cascades_alerts() {
        let store = store().await;
        let now = Utc::now();

        store
            .upsert_span(&span("t-old", "s1", now - Duration::days(8)))
            .await
            .unwrap();
        store.upsert_span(&span("t-new", "s1", now)).await.unwrap();

        let alert = Alert::new(
            "t-old".to_string(),
            "s1".to_string(),
            "cust-1".to_string(),
            "svc".to_string(),
            "/chat".to_string(),
            AlertType::CostSpike,
            AlertSeverity::High,
        );
        store.insert_alert(&alert).await.unwrap();

        let removed = store
            .delete_spans_before(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_alert(&alert.alert_id).await.unwrap().is_none());
        assert!(store
            .get_span(&SpanKey::new("t-new", "s1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_baseline_upsert_is_monotonic() {
        let store = store().await;
        let now = Utc::now();

        let fresh = CostBaseline {
            service_name: "svc".to_string(),
            endpoint: "/chat".to_string(),
            window: BaselineWindow::TwentyFourHours,
            p50_cost: 0.001,
            p95_cost: 0.002,
            p99_cost: 0.004,
            p50_latency: 50.0,
            p95_latency: 150.0,
            p99_latency: 300.0,
            sample_count: 200,
            last_updated: now,
        };
        store.upsert_baseline(&fresh).await.unwrap();

        let stale = CostBaseline {
            sample_count: 3,
            last_updated: now - Duration::minutes(10),
            ..fresh.clone()
        };
        store.upsert_baseline(&stale).await.unwrap();

        let stored = store
            .get_baseline("svc", "/chat", BaselineWindow::TwentyFourHours)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sample_count, 200);
    }

    #[tokio::test]
    async fn test_alert_roundtrip_and_dedup_lookup() {
        let store = store().await;
        let now = Utc::now();
        store.upsert_span(&span("t1", "s1", now)).await.unwrap();

        let mut alert = Alert::new(
            "t1".to_string(),
            "s1".to_string(),
            "cust-1".to_string(),
            "svc".to_string(),
            "/chat".to_string(),
            AlertType::CostSpike,
            AlertSeverity::Medium,
        );
        alert.current_cost = 0.01;
        alert.baseline_cost = 0.001;
        alert.cost_increase_percent = 900.0;
        alert.reasoning = "cost 10x over baseline".to_string();
        store.insert_alert(&alert).await.unwrap();

        let found = store
            .find_recent_alert(
                "cust-1",
                "svc",
                "/chat",
                AlertType::CostSpike,
                now - Duration::seconds(60),
            )
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().alert_id, alert.alert_id);

        // Resolved alerts do not count for dedup
        alert.transition(AlertStatus::Resolved).unwrap();
        store.update_alert(&alert).await.unwrap();
        let found = store
            .find_recent_alert(
                "cust-1",
                "svc",
                "/chat",
                AlertType::CostSpike,
                now - Duration::seconds(60),
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_api_key_lookup() {
        let store = store().await;

        sqlx::query("INSERT INTO api_keys (api_key, customer_id) VALUES (?, ?)")
            .bind("sk-test-1")
            .bind("cust-42")
            .execute(store.pool())
            .await
            .unwrap();

        assert_eq!(
            store.lookup_customer("sk-test-1").await.unwrap(),
            Some("cust-42".to_string())
        );
        assert_eq!(store.lookup_customer("sk-unknown").await.unwrap(), None);
    }
}
