//! # Courier Bus Runtime
//!
//! Hosts the server bus as a standalone process.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Register metrics and install logging
//! 3. Build the bus, attach the Prometheus monitor
//! 4. Register services and lock reserved subjects
//! 5. Run until Ctrl+C, then stop the bus

use anyhow::{Context, Result};
use bus_runtime::{BusRuntime, RuntimeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;

    let metrics = courier_telemetry::init_telemetry(&config.telemetry)
        .context("Failed to initialize telemetry")?;

    let mut runtime = BusRuntime::new(config, metrics).context("Failed to build bus runtime")?;
    runtime.start().context("Failed to start bus runtime")?;

    info!("Bus is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown();
    Ok(())
}
