//! Configuration management.
//!
//! Values come from an optional file (named by `TRANSMUTE_CONFIG`) and
//! `TRANSMUTE__`-prefixed environment variables, with `__` separating nested
//! keys (`TRANSMUTE__SCHEDULER__DEFAULT_CONCURRENCY_LIMIT=8`).
//! Durations accept humantime strings such as `2500ms` or `2m`.

use serde::Deserialize;
use std::time::Duration;

use crate::batch::{BatchConfig, RetryPolicy};
use crate::error::{ErrorCode, ErrorContext, Result, TransmuteError};

const ENV_PREFIX: &str = "TRANSMUTE";
const CONFIG_FILE_VAR: &str = "TRANSMUTE_CONFIG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration. Without it, records are kept in memory.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Scheduler defaults applied to submitted batches
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Remote conversion service
    #[serde(default)]
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json`, `pretty` or `compact`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Install the Prometheus recorder and serve `/metrics`
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrency limit used when a submission does not name one
    #[serde(default = "default_concurrency_limit")]
    pub default_concurrency_limit: usize,

    /// Attempts per job, including the first
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub default_backoff: Duration,

    /// Upper bound on a single conversion call
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Events buffered per reporter before new ones are dropped
    #[serde(default = "default_reporter_buffer")]
    pub reporter_buffer: usize,

    /// How long one reporter notification may take
    #[serde(default = "default_reporter_timeout", with = "humantime_serde")]
    pub reporter_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_concurrency_limit: default_concurrency_limit(),
            default_max_attempts: default_max_attempts(),
            default_backoff: default_backoff(),
            call_timeout: default_call_timeout(),
            reporter_buffer: default_reporter_buffer(),
            reporter_timeout: default_reporter_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Batch settings for a submission, falling back to these defaults.
    pub fn batch_config(
        &self,
        concurrency_limit: Option<usize>,
        max_attempts: Option<u32>,
        backoff: Option<Duration>,
    ) -> BatchConfig {
        BatchConfig {
            concurrency_limit: concurrency_limit.unwrap_or(self.default_concurrency_limit),
            retry: RetryPolicy::new(
                max_attempts.unwrap_or(self.default_max_attempts),
                backoff.unwrap_or(self.default_backoff),
            )
            .with_call_timeout(self.call_timeout),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversionConfig {
    /// Endpoint receiving `POST` conversion requests
    #[serde(default = "default_conversion_endpoint")]
    pub endpoint: String,

    /// Bearer token sent with each request
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP client timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_conversion_endpoint(),
            api_key: None,
            request_timeout: default_request_timeout(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_metrics_enabled() -> bool { true }
fn default_concurrency_limit() -> usize { 5 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff() -> Duration { Duration::from_millis(2500) }
fn default_call_timeout() -> Duration { crate::batch::DEFAULT_CALL_TIMEOUT }
fn default_reporter_buffer() -> usize { 256 }
fn default_reporter_timeout() -> Duration { Duration::from_secs(5) }
fn default_conversion_endpoint() -> String { "http://localhost:9000/convert".to_string() }
fn default_request_timeout() -> Duration { Duration::from_secs(180) }

impl Config {
    /// Load from the file named by `TRANSMUTE_CONFIG` when set, then the
    /// environment.
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_VAR).ok();
        Self::build(file.as_deref())
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::build(Some(path))
    }

    fn build(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the scheduler or the pool would refuse later.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.default_concurrency_limit == 0 {
            return Err(TransmuteError::configuration(
                "scheduler.default_concurrency_limit must be at least 1",
            ));
        }
        if self.scheduler.default_max_attempts == 0 {
            return Err(TransmuteError::configuration(
                "scheduler.default_max_attempts must be at least 1",
            ));
        }
        if self.scheduler.reporter_buffer == 0 {
            return Err(TransmuteError::configuration(
                "scheduler.reporter_buffer must be at least 1",
            ));
        }
        if let Some(db) = &self.database {
            if db.min_connections > db.max_connections {
                return Err(TransmuteError::configuration(
                    "database.min_connections exceeds database.max_connections",
                ));
            }
        }
        self.server
            .host
            .parse::<std::net::IpAddr>()
            .with_error_code(ErrorCode::ConfigurationError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.database.is_none());
        assert_eq!(config.scheduler.default_concurrency_limit, 5);
        assert_eq!(config.scheduler.default_max_attempts, 3);
        assert_eq!(config.scheduler.default_backoff, Duration::from_millis(2500));
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_batch_config_overrides() {
        let scheduler = SchedulerConfig::default();

        let defaults = scheduler.batch_config(None, None, None);
        assert_eq!(defaults.concurrency_limit, 5);
        assert_eq!(defaults.retry.max_attempts(), 3);
        assert_eq!(defaults.retry.backoff_delay(), Duration::from_millis(2500));
        assert_eq!(defaults.retry.call_timeout(), Duration::from_secs(120));

        let custom = scheduler.batch_config(Some(2), Some(1), Some(Duration::ZERO));
        assert_eq!(custom.concurrency_limit, 2);
        assert_eq!(custom.retry.max_attempts(), 1);
        assert_eq!(custom.retry.backoff_delay(), Duration::ZERO);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[scheduler]
default_concurrency_limit = 3
default_backoff = "500ms"
call_timeout = "30s"

[database]
url = "postgres://localhost/transmute"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.scheduler.default_concurrency_limit, 3);
        assert_eq!(config.scheduler.default_backoff, Duration::from_millis(500));
        assert_eq!(config.scheduler.call_timeout, Duration::from_secs(30));

        let database = config.database.unwrap();
        assert_eq!(database.url, "postgres://localhost/transmute");
        assert_eq!(database.max_connections, 20);
        assert_eq!(database.min_connections, 2);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.scheduler.default_concurrency_limit = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);

        let mut config = Config::default();
        config.server.host = "not an address".to_string();
        assert!(config.validate().is_err());
    }
}
