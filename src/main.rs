use llm_trace_observatory::{
    api::{build_query_router, build_receiver_router, AppState},
    baseline::{AlertNotifier, AnomalyDetector, BaselineEngine},
    config::Config,
    ingest::{Enricher, InMemoryQueue, QuotaGuard, Receiver, TraceQueue, WorkerPool},
    pricing::PricingTable,
    query::QueryService,
    retention::RetentionSweeper,
    store::create_store,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so logging follows it
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config);

    tracing::info!(
        "Starting LLM Trace Observatory v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = llm_trace_observatory::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("✅ Prometheus metrics initialized");
        }
    }

    // Store is fatal at boot: fail fast when unreachable
    let store = create_store(&config.store).await?;
    tracing::info!("✅ Trace store initialized");

    // Pricing table: embedded defaults, optional file override
    let pricing = match config.pricing_path {
        Some(ref path) => {
            let table = PricingTable::from_file(path)?;
            tracing::info!(path = %path.display(), models = table.len(), "Pricing table loaded");
            Arc::new(table)
        }
        None => Arc::new(PricingTable::with_defaults()),
    };

    if let Some(ref url) = config.queue.url {
        tracing::warn!(
            queue_url = %url,
            "QUEUE_URL set but only the in-process queue backend is built in; using it"
        );
    }
    let queue = InMemoryQueue::new(config.queue.clone());
    let queue: Arc<dyn TraceQueue> = Arc::new(queue);
    tracing::info!(
        high_water_mark = config.queue.high_water_mark,
        "✅ Ingest queue initialized"
    );

    // Baseline engine + periodic percentile recompute
    let baselines = Arc::new(BaselineEngine::new(store.clone(), config.baseline.clone()));
    tokio::spawn(Arc::clone(&baselines).run_ticker());
    tracing::info!(
        update_period_secs = config.baseline.update_period_secs,
        "✅ Baseline engine started"
    );

    // Anomaly detector
    let detector = Arc::new(AnomalyDetector::new(
        store.clone(),
        baselines.clone(),
        config.baseline.modal_min_support,
        config.anomaly.clone(),
    ));

    // Worker pool
    let workers = Arc::new(WorkerPool::new(
        queue.clone(),
        store.clone(),
        Enricher::new(pricing),
        baselines.clone(),
        detector,
        config.workers.clone(),
    ));
    let worker_handles = Arc::clone(&workers).spawn();
    tracing::info!(count = worker_handles.len(), "✅ Worker pool started");

    // Alert notifier: pending -> sent dispatch and 24h auto-expiry
    let notifier = Arc::new(AlertNotifier::new(store.clone(), config.anomaly.clone()));
    tokio::spawn(Arc::clone(&notifier).run(30));
    tracing::info!("✅ Alert notifier started");

    // Retention sweep at boot, then periodically
    let sweeper = Arc::new(RetentionSweeper::new(
        store.clone(),
        config.retention.clone(),
    ));
    if let Err(e) = sweeper.run_once().await {
        tracing::error!(error = %e, "Boot retention sweep failed");
    }
    tokio::spawn(Arc::clone(&sweeper).run());
    tracing::info!(
        retention_days = config.retention.days,
        "✅ Retention sweeper started"
    );

    // Receiver + query services
    let quota = Arc::new(QuotaGuard::new(config.ingest.daily_trace_quota));
    let receiver = Arc::new(Receiver::new(
        queue.clone(),
        quota,
        config.ingest.max_batch_size,
    ));
    let state = AppState::new(receiver, QueryService::new(store.clone()), store);

    let receiver_app = build_receiver_router(state.clone());
    let query_app = build_query_router(state);

    let receiver_addr = format!("{}:{}", config.server.host, config.server.receiver_port);
    let query_addr = format!("{}:{}", config.server.host, config.server.query_port);

    let receiver_listener = tokio::net::TcpListener::bind(&receiver_addr).await?;
    let query_listener = tokio::net::TcpListener::bind(&query_addr).await?;

    tracing::info!("🚀 Receiver listening on http://{}", receiver_addr);
    tracing::info!("   Ingest: http://{}/v1/traces", receiver_addr);
    tracing::info!("🚀 Query API listening on http://{}", query_addr);
    tracing::info!("   Traces: http://{}/api/traces", query_addr);
    tracing::info!("   Analytics: http://{}/api/analytics/summary", query_addr);
    tracing::info!("   Metrics: http://{}/metrics", query_addr);

    let receiver_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(receiver_listener, receiver_app).await {
            tracing::error!("Receiver server error: {}", e);
        }
    });
    let query_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(query_listener, query_app).await {
            tracing::error!("Query server error: {}", e);
        }
    });

    tokio::select! {
        _ = receiver_handle => {
            tracing::warn!("Receiver server stopped");
        }
        _ = query_handle => {
            tracing::warn!("Query server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "llm_trace_observatory={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
