//! # Runtime Configuration
//!
//! Bus and telemetry settings plus the runtime's own knobs, all read from the
//! environment once at startup.

use courier_telemetry::TelemetryConfig;
use server_bus::{BusConfig, ConfigError};
use std::time::Duration;

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bus configuration.
    pub bus: BusConfig,
    /// Logging configuration.
    pub telemetry: TelemetryConfig,
    /// Period of the stats log line; `None` disables it.
    pub stats_interval: Option<Duration>,
    /// Register the built-in `Echo` service.
    pub echo_service: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            telemetry: TelemetryConfig::default(),
            stats_interval: Some(Duration::from_secs(60)),
            echo_service: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Besides the bus and telemetry variables:
    /// - `COURIER_STATS_SECS`: stats log period, `0` disables (default: 60)
    /// - `COURIER_ECHO_SERVICE`: register `Echo` (default: true)
    ///
    /// # Errors
    ///
    /// Any bus [`ConfigError`], or `ConfigError::InvalidValue` for the
    /// runtime variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            bus: BusConfig::from_env()?,
            telemetry: TelemetryConfig::from_env(),
            ..Self::default()
        };

        if let Ok(raw) = std::env::var("COURIER_STATS_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "COURIER_STATS_SECS".to_string(),
                value: raw.clone(),
            })?;
            config.stats_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(raw) = std::env::var("COURIER_ECHO_SERVICE") {
            config.echo_service = raw.to_lowercase() != "false" && raw != "0";
        }

        Ok(config)
    }
}
