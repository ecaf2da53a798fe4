//! # Bus Runtime Library
//!
//! Exposes the runtime pieces for testing. The main entry point is the
//! `main.rs` binary.
//!
//! - `config` - environment-driven [`RuntimeConfig`]
//! - `services` - built-in services (`Echo`)
//! - `runtime` - [`BusRuntime`], owning the bus and its telemetry

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod runtime;
pub mod services;

pub use config::RuntimeConfig;
pub use runtime::{BusRuntime, RuntimeError};
pub use services::{echo, ECHO_SUBJECT, TEXT};
