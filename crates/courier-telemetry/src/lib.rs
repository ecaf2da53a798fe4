//! # Courier Telemetry
//!
//! Observability for the Courier bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` registry with an `EnvFilter` and a
//!   pretty (development) or JSON (containers) output layer
//! - **Metrics**: Prometheus queue, traffic, subscription and failure metrics
//!   fed by [`PrometheusMonitor`] through the bus monitor boundary
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_telemetry::{init_telemetry, PrometheusMonitor, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let metrics = init_telemetry(&config)?;
//! bus.attach_monitor(Arc::new(PrometheusMonitor::new(metrics)));
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `courier` | Service name in logs |
//! | `COURIER_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directive |
//! | `COURIER_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `COURIER_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;
mod monitor;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};
pub use metrics::{encode_metrics, register_metrics, BusMetrics, REGISTRY};
pub use monitor::{CountingFailureHandler, PrometheusMonitor};

use std::sync::Arc;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register the shared metrics, then install logging.
///
/// # Errors
///
/// Any [`TelemetryError`] from either step.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Arc<BusMetrics>, TelemetryError> {
    // Metrics first so they exist even if logging was set up elsewhere.
    let metrics = register_metrics()?;
    init_logging(config)?;
    Ok(metrics)
}
