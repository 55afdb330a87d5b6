//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use transmute_core::config::ObservabilityConfig;
//! use transmute_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_observability(&ObservabilityConfig::default());
//! let metrics = init_telemetry(&config).expect("Failed to initialize telemetry");
//! println!("{}", metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, BatchMetrics, MetricsRegistry};

use crate::config::ObservabilityConfig;

/// Unified telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name used as a global metric label
    pub service_name: String,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Whether to install the Prometheus recorder
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from the `observability` configuration section.
    ///
    /// An unknown log format falls back to JSON.
    pub fn from_observability(config: &ObservabilityConfig) -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig {
                level: config.log_level.clone(),
                format: config.log_format.parse().unwrap_or_default(),
                ..LoggingConfig::default()
            },
            metrics_enabled: config.metrics_enabled,
        }
    }
}

fn default_service_name() -> String {
    "transmute-core".to_string()
}

/// Initialize logging and metrics.
///
/// Called once at application startup.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<MetricsRegistry> {
    let metrics = init_metrics(config.metrics_enabled, &config.service_name)?;
    init_logging(&config.logging)?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "transmute-core");
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_from_observability() {
        let config = TelemetryConfig::from_observability(&ObservabilityConfig {
            log_level: "debug".to_string(),
            log_format: "compact".to_string(),
            metrics_enabled: false,
        });
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(!config.metrics_enabled);

        let fallback = TelemetryConfig::from_observability(&ObservabilityConfig {
            log_format: "xml".to_string(),
            ..ObservabilityConfig::default()
        });
        assert_eq!(fallback.logging.format, LogFormat::Json);
    }
}
