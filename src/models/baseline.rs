use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Rolling window a baseline is computed over
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum BaselineWindow {
    #[serde(rename = "1h")]
    #[strum(serialize = "1h")]
    OneHour,

    #[serde(rename = "24h")]
    #[strum(serialize = "24h")]
    TwentyFourHours,

    #[serde(rename = "7d")]
    #[strum(serialize = "7d")]
    SevenDays,
}

impl BaselineWindow {
    pub const ALL: [BaselineWindow; 3] = [
        BaselineWindow::OneHour,
        BaselineWindow::TwentyFourHours,
        BaselineWindow::SevenDays,
    ];

    pub fn duration(&self) -> Duration {
        match self {
            BaselineWindow::OneHour => Duration::hours(1),
            BaselineWindow::TwentyFourHours => Duration::hours(24),
            BaselineWindow::SevenDays => Duration::days(7),
        }
    }

    /// The widest window; baseline rows idle past this are garbage-collected
    pub fn widest() -> BaselineWindow {
        BaselineWindow::SevenDays
    }
}

/// Rolling cost and latency percentiles for one (service, endpoint, window).
///
/// Latency percentiles live in the same row as cost: the two baselines are
/// maintained symmetrically from the same sample stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBaseline {
    pub service_name: String,
    pub endpoint: String,
    pub window: BaselineWindow,

    pub p50_cost: f64,
    pub p95_cost: f64,
    pub p99_cost: f64,

    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,

    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl CostBaseline {
    pub fn key(&self) -> (String, String, BaselineWindow) {
        (self.service_name.clone(), self.endpoint.clone(), self.window)
    }

    /// True when this row has been idle longer than the widest window
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_updated > BaselineWindow::widest().duration()
    }
}
