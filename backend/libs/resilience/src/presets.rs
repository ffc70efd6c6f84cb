/// Preset configurations for store access
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for relational store access
#[derive(Debug, Clone)]
pub struct StoreResilienceConfig {
    pub timeout: TimeoutConfig,
    pub retry: RetryConfig,
}

/// Store transactions (PostgreSQL)
///
/// - Timeout: 5s to open a unit of work
/// - Retry: 3 attempts, 50ms doubling up to 2s, only for transient failures
pub fn store_config() -> StoreResilienceConfig {
    StoreResilienceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        },
    }
}
