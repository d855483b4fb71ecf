use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Relational store configuration
    pub store: StoreConfig,

    /// Ingest queue configuration
    pub queue: QueueConfig,

    /// Receiver-side ingest limits
    pub ingest: IngestConfig,

    /// Worker pool configuration
    pub workers: WorkerConfig,

    /// Baseline engine configuration
    pub baseline: BaselineConfig,

    /// Anomaly classification configuration
    pub anomaly: AnomalyConfig,

    /// Retention sweep configuration
    pub retention: RetentionConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Optional pricing table override file (TOML)
    pub pricing_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from embedded defaults, optional file, and environment.
    ///
    /// Layering (last wins): embedded defaults, CONFIG_PATH file, LLM_TO__
    /// prefixed variables, then the bare platform variables from the
    /// deployment contract (STORE_URL, QUEUE_URL, RETENTION_DAYS,
    /// DAILY_TRACE_QUOTA, RECEIVER_PORT, QUERY_PORT).
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        let mut cfg: Self = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("LLM_TO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        cfg.apply_platform_env();
        Ok(cfg)
    }

    /// Apply the bare environment variables named in the deployment contract.
    fn apply_platform_env(&mut self) {
        if let Ok(url) = std::env::var("STORE_URL") {
            self.store.url = url;
        }
        if let Ok(url) = std::env::var("QUEUE_URL") {
            self.queue.url = Some(url);
        }
        if let Some(days) = env_parse::<u32>("RETENTION_DAYS") {
            self.retention.days = days;
        }
        if let Some(quota) = env_parse::<u64>("DAILY_TRACE_QUOTA") {
            self.ingest.daily_trace_quota = quota;
        }
        if let Some(port) = env_parse::<u16>("RECEIVER_PORT") {
            self.server.receiver_port = port;
        }
        if let Some(port) = env_parse::<u16>("QUERY_PORT") {
            self.server.query_port = port;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host for both listeners
    #[serde(default = "default_host")]
    pub host: String,

    /// Ingest (receiver) listener port
    #[serde(default = "default_receiver_port")]
    pub receiver_port: u16,

    /// Query/analytics listener port
    #[serde(default = "default_query_port")]
    pub query_port: u16,

    /// Request timeout (seconds); also the external I/O deadline
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store connection string (sqlite path or sqlite::memory:)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Connection pool size; sized roughly to workers + query concurrency + 4
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// External broker URL. Recognised but unused by the in-process backend.
    #[serde(default)]
    pub url: Option<String>,

    /// Bounded queue depth; publishes past this signal backpressure
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Hard bound on how long a publish may wait before BACKPRESSURE
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Nack retries before a batch is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential retry backoff
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Daily per-customer span quota, reset at UTC midnight
    #[serde(default = "default_daily_trace_quota")]
    pub daily_trace_quota: u64,

    /// Maximum spans accepted in one envelope
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker tasks consuming the queue
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Store write latency above this is counted as slow (AIMD input)
    #[serde(default = "default_store_latency_threshold_ms")]
    pub store_latency_threshold_ms: u64,

    /// Sustained-slow window before workers begin backing off
    #[serde(default = "default_slowdown_window_secs")]
    pub slowdown_window_secs: u64,

    /// Ceiling for the multiplicative pull delay
    #[serde(default = "default_max_pull_delay_ms")]
    pub max_pull_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Periodic percentile recompute interval
    #[serde(default = "default_update_period_secs")]
    pub update_period_secs: u64,

    /// Recompute after this many new samples on a key
    #[serde(default = "default_update_delta")]
    pub update_delta: usize,

    /// Most-recent samples retained per (service, endpoint)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Recorded hashes required before modal divergence can alert
    #[serde(default = "default_modal_min_support")]
    pub modal_min_support: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Cost spike trigger: cost > multiplier * p95_cost
    #[serde(default = "default_spike_multiplier")]
    pub cost_spike_multiplier: f64,

    /// Latency spike trigger: latency > multiplier * p95_latency
    #[serde(default = "default_spike_multiplier")]
    pub latency_spike_multiplier: f64,

    /// Semantic score below this is a quality drop
    #[serde(default = "default_semantic_score_floor")]
    pub semantic_score_floor: f64,

    /// Hash similarity below this is a quality drop
    #[serde(default = "default_hash_similarity_floor")]
    pub hash_similarity_floor: f64,

    /// Alert deduplication window
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Non-terminal alerts auto-resolve after this many hours
    #[serde(default = "default_alert_expiry_hours")]
    pub alert_expiry_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Spans older than this many days are swept
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// Sweep interval
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_receiver_port() -> u16 {
    4317
}

fn default_query_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_store_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_pool_size() -> u32 {
    16
}

fn default_high_water_mark() -> usize {
    1024
}

fn default_publish_timeout_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_daily_trace_quota() -> u64 {
    50_000
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_worker_count() -> usize {
    4
}

fn default_store_latency_threshold_ms() -> u64 {
    250
}

fn default_slowdown_window_secs() -> u64 {
    30
}

fn default_max_pull_delay_ms() -> u64 {
    5000
}

fn default_update_period_secs() -> u64 {
    60
}

fn default_update_delta() -> usize {
    100
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_modal_min_support() -> usize {
    5
}

fn default_spike_multiplier() -> f64 {
    2.0
}

fn default_semantic_score_floor() -> f64 {
    0.5
}

fn default_hash_similarity_floor() -> f64 {
    0.3
}

fn default_dedup_window_secs() -> u64 {
    60
}

fn default_alert_expiry_hours() -> u64 {
    24
}

fn default_retention_days() -> u32 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    86_400
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                receiver_port: default_receiver_port(),
                query_port: default_query_port(),
                request_timeout_secs: default_request_timeout(),
            },
            store: StoreConfig {
                url: default_store_url(),
                pool_size: default_pool_size(),
            },
            queue: QueueConfig {
                url: None,
                high_water_mark: default_high_water_mark(),
                publish_timeout_ms: default_publish_timeout_ms(),
                max_retries: default_max_retries(),
                retry_backoff_ms: default_retry_backoff_ms(),
            },
            ingest: IngestConfig {
                daily_trace_quota: default_daily_trace_quota(),
                max_batch_size: default_max_batch_size(),
            },
            workers: WorkerConfig {
                count: default_worker_count(),
                store_latency_threshold_ms: default_store_latency_threshold_ms(),
                slowdown_window_secs: default_slowdown_window_secs(),
                max_pull_delay_ms: default_max_pull_delay_ms(),
            },
            baseline: BaselineConfig {
                update_period_secs: default_update_period_secs(),
                update_delta: default_update_delta(),
                buffer_capacity: default_buffer_capacity(),
                modal_min_support: default_modal_min_support(),
            },
            anomaly: AnomalyConfig {
                cost_spike_multiplier: default_spike_multiplier(),
                latency_spike_multiplier: default_spike_multiplier(),
                semantic_score_floor: default_semantic_score_floor(),
                hash_similarity_floor: default_hash_similarity_floor(),
                dedup_window_secs: default_dedup_window_secs(),
                alert_expiry_hours: default_alert_expiry_hours(),
            },
            retention: RetentionConfig {
                days: default_retention_days(),
                sweep_interval_secs: default_sweep_interval_secs(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logs: false,
                prometheus_enabled: true,
            },
            pricing_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_receiver_port(), 4317);
        assert_eq!(default_query_port(), 8080);
        assert_eq!(default_daily_trace_quota(), 50_000);
        assert_eq!(default_retention_days(), 7);
        assert_eq!(default_update_period_secs(), 60);
        assert_eq!(default_update_delta(), 100);
        assert!(default_true());
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.queue.high_water_mark, 1024);
        assert_eq!(cfg.anomaly.dedup_window_secs, 60);
        assert_eq!(cfg.baseline.buffer_capacity, 10_000);
    }
}
