//! The bus runtime: one bus, its services and its telemetry.

use crate::config::RuntimeConfig;
use crate::services::{echo, ECHO_SUBJECT};
use courier_telemetry::{BusMetrics, CountingFailureHandler, PrometheusMonitor};
use server_bus::{BusError, ConfigError, LoggingFailureHandler, ServerBus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Runtime startup errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid bus configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("service registration failed: {0}")]
    Service(#[from] BusError),

    #[error("runtime already started")]
    AlreadyStarted,
}

/// Hosts a [`ServerBus`] until shutdown.
pub struct BusRuntime {
    config: RuntimeConfig,
    bus: ServerBus,
    metrics: Arc<BusMetrics>,
    started: bool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BusRuntime {
    /// Build the bus and wire telemetry into it. Must run inside a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// `RuntimeError::Config` if the bus configuration is invalid.
    pub fn new(config: RuntimeConfig, metrics: Arc<BusMetrics>) -> Result<Self, RuntimeError> {
        let bus = ServerBus::new(config.bus.clone())?;
        bus.set_failure_handler(Arc::new(CountingFailureHandler::new(
            Arc::clone(&metrics),
            LoggingFailureHandler,
        )));
        bus.attach_monitor(Arc::new(PrometheusMonitor::new(Arc::clone(&metrics))));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            bus,
            metrics,
            started: false,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Register the built-in services, lock the reserved subjects and start
    /// the stats reporter.
    ///
    /// ## Startup Sequence
    ///
    /// 1. Register services
    /// 2. `finish_init`: subjects with local handlers become reserved
    /// 3. Start the stats reporter
    ///
    /// # Errors
    ///
    /// `RuntimeError::AlreadyStarted` on a second call, or the bus error of a
    /// failed registration.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }

        info!("===========================================");
        info!("  Courier Bus Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        if self.config.echo_service {
            self.bus.subscribe(ECHO_SUBJECT, echo)?;
            info!(subject = ECHO_SUBJECT, "Service registered");
        }

        self.bus.finish_init();
        self.started = true;

        if let Some(period) = self.config.stats_interval {
            self.spawn_stats_reporter(period);
        }

        info!(
            queue_size = self.config.bus.queue_size,
            long_polling = self.config.bus.long_polling,
            "Bus runtime started"
        );
        Ok(())
    }

    fn spawn_stats_reporter(&self, period: Duration) {
        let bus = self.bus.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => log_stats(&bus),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Stop the bus and the background tasks.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        log_stats(&self.bus);
        self.bus.stop();

        match self.metrics.encode() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => error!(error = %e, "Could not encode metrics"),
        }
        info!("Shutdown complete");
    }

    #[must_use]
    pub fn bus(&self) -> &ServerBus {
        &self.bus
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }
}

fn log_stats(bus: &ServerBus) {
    let stats = bus.stats();
    info!(
        queues = bus.queue_count(),
        sent = stats.sent.load(Ordering::Relaxed),
        deferred = stats.deferred.load(Ordering::Relaxed),
        retried = stats.retried.load(Ordering::Relaxed),
        failed = stats.failed.load(Ordering::Relaxed),
        evicted = stats.evicted.load(Ordering::Relaxed),
        "Bus stats"
    );
}
