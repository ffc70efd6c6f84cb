/// Resilience helpers shared by the engagement backend
///
/// - **Retry**: exponential backoff with jitter, gated by a retry predicate so
///   only transient failures are retried
/// - **Timeout**: bounded waits on store calls that keep the inner error intact
/// - **Presets**: tuned settings for store transactions
///
/// # Example: retry only transient errors
///
/// ```rust,no_run
/// use resilience::{presets, with_retry_if};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::store_config();
///
///     let result = with_retry_if(
///         config.retry,
///         || async { Err::<(), _>("connection reset") },
///         |err: &&str| err.contains("connection"),
///     )
///     .await;
///     assert!(result.is_err());
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{store_config, StoreResilienceConfig};
pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutConfig, TimeoutError};
