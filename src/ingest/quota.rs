use chrono::{NaiveDate, Utc};
use dashmap::DashMap;

/// Daily per-customer span quota.
///
/// Counters are keyed by (customer, UTC day) and only ever increase within a
/// day; midnight rollover happens by key rotation, so a counter never has to
/// be reset in place.
pub struct QuotaGuard {
    counters: DashMap<(String, NaiveDate), u64>,
    daily_quota: u64,
}

impl QuotaGuard {
    pub fn new(daily_quota: u64) -> Self {
        Self {
            counters: DashMap::new(),
            daily_quota,
        }
    }

    /// Count one span against the customer's daily quota. Returns false when
    /// the quota is already exhausted (the span must be rejected).
    pub fn try_consume(&self, customer_id: &str) -> bool {
        let today = Utc::now().date_naive();

        if self.counters.len() > 10_000 {
            self.counters.retain(|(_, day), _| *day == today);
        }

        let mut counter = self
            .counters
            .entry((customer_id.to_string(), today))
            .or_insert(0);

        if *counter >= self.daily_quota {
            return false;
        }
        *counter += 1;
        true
    }

    /// Spans counted for the customer today
    pub fn usage(&self, customer_id: &str) -> u64 {
        let today = Utc::now().date_naive();
        self.counters
            .get(&(customer_id.to_string(), today))
            .map(|counter| *counter)
            .unwrap_or(0)
    }
}
