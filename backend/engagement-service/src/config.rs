/// Configuration management for Engagement Service
///
/// Loads configuration from environment variables.
use anyhow::{bail, Context, Result};
use resilience::{store_config, RetryConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Store configuration
    pub database: DatabaseConfig,
    /// Feed ranking settings
    pub feed: FeedConfig,
    /// Counter reconciliation worker
    pub reconciliation: ReconciliationConfig,
    /// Toggle retry policy
    pub retry: RetrySettings,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port for health checks and metrics
    pub http_port: u16,
    /// Emit JSON log lines instead of the human-readable format
    pub json_logs: bool,
}

/// Which store backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("unknown STORE_BACKEND: {}", other),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// Database URL (required for the postgres backend)
    pub url: Option<String>,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout_secs: u64,
    /// Server-side per-statement limit
    pub statement_timeout_ms: u64,
    /// Upper bound on opening a unit of work
    pub begin_timeout_ms: u64,
}

/// Feed ranking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Wire follow/view signals into the score
    pub personalization: bool,
    /// Posts returned when the caller gives no limit
    pub default_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetrySettings {
    /// Settings seeded from the store resilience preset
    fn from_preset(enabled: bool) -> Self {
        let preset = store_config().retry;
        RetrySettings {
            enabled,
            max_retries: preset.max_retries,
            initial_backoff_ms: preset.initial_backoff.as_millis() as u64,
            max_backoff_ms: preset.max_backoff.as_millis() as u64,
        }
    }

    /// Retry policy for toggles, `None` when disabled
    pub fn policy(&self) -> Option<RetryConfig> {
        if !self.enabled {
            return None;
        }
        Some(RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        })
    }
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_begin_timeout_ms() -> u64 {
    store_config().timeout.duration.as_millis() as u64
}

fn default_feed_limit() -> usize {
    20
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_or("PORT", 8010),
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let backend = match std::env::var("STORE_BACKEND") {
            Ok(value) => value
                .parse::<StoreBackend>()
                .context("Invalid STORE_BACKEND")?,
            Err(_) => StoreBackend::Postgres,
        };
        let url = std::env::var("DATABASE_URL").ok();
        if backend == StoreBackend::Postgres && url.is_none() {
            bail!("DATABASE_URL environment variable not set");
        }

        let database = DatabaseConfig {
            backend,
            url,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 10),
            statement_timeout_ms: env_or("DB_STATEMENT_TIMEOUT_MS", 5_000),
            begin_timeout_ms: env_or("DB_BEGIN_TIMEOUT_MS", default_begin_timeout_ms()),
        };

        let feed = FeedConfig {
            personalization: env_flag("FEED_PERSONALIZATION", false),
            default_limit: env_or("FEED_DEFAULT_LIMIT", default_feed_limit()),
        };

        let reconciliation = ReconciliationConfig {
            enabled: env_flag("COUNTER_RECONCILE_ENABLED", true),
            interval_secs: env_or("COUNTER_RECONCILE_INTERVAL_SECS", 3_600),
            initial_delay_secs: env_or("COUNTER_RECONCILE_INITIAL_DELAY_SECS", 30),
        };

        let preset = RetrySettings::from_preset(env_flag("TOGGLE_RETRY_ENABLED", true));
        let retry = RetrySettings {
            max_retries: env_or("TOGGLE_RETRY_MAX", preset.max_retries),
            initial_backoff_ms: env_or("TOGGLE_RETRY_INITIAL_BACKOFF_MS", preset.initial_backoff_ms),
            max_backoff_ms: env_or("TOGGLE_RETRY_MAX_BACKOFF_MS", preset.max_backoff_ms),
            ..preset
        };

        Ok(Config {
            app,
            database,
            feed,
            reconciliation,
            retry,
        })
    }

    /// Defaults for the in-memory backend, no environment lookups
    pub fn in_memory() -> Self {
        Config {
            app: AppConfig {
                env: "test".to_string(),
                host: "127.0.0.1".to_string(),
                http_port: 0,
                json_logs: false,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Memory,
                url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                acquire_timeout_secs: 10,
                statement_timeout_ms: 5_000,
                begin_timeout_ms: default_begin_timeout_ms(),
            },
            feed: FeedConfig {
                personalization: false,
                default_limit: default_feed_limit(),
            },
            reconciliation: ReconciliationConfig {
                enabled: false,
                interval_secs: 3_600,
                initial_delay_secs: 0,
            },
            retry: RetrySettings::from_preset(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "STORE_BACKEND",
            "DATABASE_URL",
            "PORT",
            "LOG_FORMAT",
            "FEED_PERSONALIZATION",
            "TOGGLE_RETRY_ENABLED",
            "TOGGLE_RETRY_MAX",
            "DB_BEGIN_TIMEOUT_MS",
            "FEED_DEFAULT_LIMIT",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_values() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.host, "0.0.0.0");
        assert_eq!(config.app.http_port, 8010);
        assert!(!config.app.json_logs);
        assert_eq!(config.database.backend, StoreBackend::Postgres);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.database.min_connections, 5);
        assert!(!config.feed.personalization);
        assert!(config.retry.policy().is_some());
        assert_eq!(config.feed.default_limit, 20);
    }

    #[test]
    #[serial]
    fn test_store_defaults_follow_resilience_preset() {
        clear_env();
        std::env::set_var("STORE_BACKEND", "memory");

        let config = Config::from_env().unwrap();
        let preset = store_config();
        let policy = config.retry.policy().unwrap();

        assert_eq!(policy.max_retries, preset.retry.max_retries);
        assert_eq!(policy.initial_backoff, preset.retry.initial_backoff);
        assert_eq!(policy.max_backoff, preset.retry.max_backoff);
        assert_eq!(
            Duration::from_millis(config.database.begin_timeout_ms),
            preset.timeout.duration
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_overrides_preset() {
        clear_env();
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::set_var("TOGGLE_RETRY_MAX", "7");
        std::env::set_var("FEED_DEFAULT_LIMIT", "5");

        let config = Config::from_env().unwrap();

        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.feed.default_limit, 5);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_postgres_requires_database_url() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_memory_backend_without_url() {
        clear_env();
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::set_var("FEED_PERSONALIZATION", "true");
        std::env::set_var("TOGGLE_RETRY_ENABLED", "false");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert!(config.database.url.is_none());
        assert!(config.feed.personalization);
        assert!(config.retry.policy().is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unknown_backend_is_rejected() {
        clear_env();
        std::env::set_var("STORE_BACKEND", "cassandra");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
