//! Prometheus metrics for the bus.
//!
//! All metrics follow the naming convention: `courier_bus_<metric>[_total]`
//!
//! ## Metric Types
//!
//! - **Counter**: monotonically increasing (e.g. `courier_bus_messages_total`)
//! - **Gauge**: current value (e.g. `courier_bus_queues_connected`)

use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Process-wide registry scraped by the runtime.
    pub static ref REGISTRY: Registry = Registry::new();

    static ref GLOBAL_METRICS: Mutex<Option<Arc<BusMetrics>>> = Mutex::new(None);
}

/// Message direction label values.
pub mod direction {
    pub const INCOMING: &str = "incoming";
    pub const OUTGOING: &str = "outgoing";
    pub const IN_BUS: &str = "in_bus";
}

/// Subscription scope label values.
pub mod scope {
    pub const LOCAL: &str = "local";
    pub const REMOTE: &str = "remote";
}

/// Every bus metric, registered in one registry.
#[derive(Clone)]
pub struct BusMetrics {
    registry: Registry,

    // =========================================================================
    // QUEUES
    // =========================================================================
    /// Queues currently attached
    pub queues_connected: IntGauge,
    /// Queues ever attached
    pub queues_attached: IntCounter,
    /// Queues detached by disconnect or eviction
    pub queues_detached: IntCounter,

    // =========================================================================
    // TRAFFIC
    // =========================================================================
    /// Messages by direction (incoming/outgoing/in_bus)
    pub messages: IntCounterVec,

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================
    /// Active subscriptions by scope (local subjects, remote subject/session pairs)
    pub subscriptions: IntGaugeVec,
    /// Subscription changes by change (added/removed) and scope
    pub subscription_changes: IntCounterVec,

    // =========================================================================
    // FAILURES
    // =========================================================================
    /// Terminal delivery failures by error kind
    pub delivery_failures: IntCounterVec,
}

impl BusMetrics {
    /// Create every metric and register it in `registry`.
    ///
    /// # Errors
    ///
    /// `TelemetryError::MetricsInit` if a metric is invalid or already
    /// registered there.
    pub fn register(registry: &Registry) -> Result<Self, TelemetryError> {
        let metrics = Self {
            registry: registry.clone(),
            queues_connected: IntGauge::new(
                "courier_bus_queues_connected",
                "Number of currently attached message queues",
            )
            .map_err(init_error)?,
            queues_attached: IntCounter::new(
                "courier_bus_queues_attached_total",
                "Total message queues attached",
            )
            .map_err(init_error)?,
            queues_detached: IntCounter::new(
                "courier_bus_queues_detached_total",
                "Total message queues detached",
            )
            .map_err(init_error)?,
            messages: IntCounterVec::new(
                Opts::new("courier_bus_messages_total", "Messages seen by the bus"),
                &["direction"],
            )
            .map_err(init_error)?,
            subscriptions: IntGaugeVec::new(
                Opts::new("courier_bus_subscriptions", "Active subscriptions"),
                &["scope"],
            )
            .map_err(init_error)?,
            subscription_changes: IntCounterVec::new(
                Opts::new(
                    "courier_bus_subscription_changes_total",
                    "Subscriptions added and removed",
                ),
                &["change", "scope"],
            )
            .map_err(init_error)?,
            delivery_failures: IntCounterVec::new(
                Opts::new(
                    "courier_bus_delivery_failures_total",
                    "Terminal delivery failures",
                ),
                &["kind"],
            )
            .map_err(init_error)?,
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.queues_connected.clone()),
            Box::new(metrics.queues_attached.clone()),
            Box::new(metrics.queues_detached.clone()),
            Box::new(metrics.messages.clone()),
            Box::new(metrics.subscriptions.clone()),
            Box::new(metrics.subscription_changes.clone()),
            Box::new(metrics.delivery_failures.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(init_error)?;
        }

        Ok(metrics)
    }

    /// Metrics in a registry of their own.
    ///
    /// # Errors
    ///
    /// `TelemetryError::MetricsInit` if a metric is invalid.
    pub fn standalone() -> Result<Self, TelemetryError> {
        Self::register(&Registry::new())
    }

    /// Encode this registry as Prometheus text format.
    ///
    /// # Errors
    ///
    /// `TelemetryError::MetricsInit` if encoding fails.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        encode(&self.registry)
    }

    #[must_use]
    pub fn message_count(&self, direction: &str) -> u64 {
        self.messages.with_label_values(&[direction]).get()
    }

    #[must_use]
    pub fn subscription_count(&self, scope: &str) -> i64 {
        self.subscriptions.with_label_values(&[scope]).get()
    }
}

impl std::fmt::Debug for BusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMetrics")
            .field("queues_connected", &self.queues_connected.get())
            .finish_non_exhaustive()
    }
}

/// Register the bus metrics in [`REGISTRY`] once and hand out the shared set.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` if registration fails.
pub fn register_metrics() -> Result<Arc<BusMetrics>, TelemetryError> {
    let mut slot = GLOBAL_METRICS.lock();
    if let Some(metrics) = slot.as_ref() {
        return Ok(Arc::clone(metrics));
    }
    let metrics = Arc::new(BusMetrics::register(&REGISTRY)?);
    *slot = Some(Arc::clone(&metrics));
    Ok(metrics)
}

/// Encode [`REGISTRY`] as Prometheus text format.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` if encoding fails.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    encode(&REGISTRY)
}

fn encode(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(init_error)?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

fn init_error(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}
