//! Engine configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Tunables for the scheduler and executor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the scan-filter-execute cycle
    pub cycle_interval: Duration,

    /// Upper bound on one opportunity-feed call
    pub feed_timeout: Duration,

    /// How many sessions may be processed concurrently within a cycle
    pub max_concurrent_sessions: usize,

    /// Log intended trades instead of placing orders
    pub dry_run: bool,

    /// Fraction of a strategy's trade cap committed per attempt
    pub trade_fraction: Decimal,

    /// Additional sell attempts after the first fails
    pub sell_retry_attempts: u32,

    /// Initial delay of the sell retry schedule
    pub sell_retry_initial_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(5),
            feed_timeout: Duration::from_secs(10),
            max_concurrent_sessions: 8,
            dry_run: false,
            trade_fraction: dec!(0.1),
            sell_retry_attempts: 3,
            sell_retry_initial_backoff: Duration::from_millis(500),
        }
    }
}
