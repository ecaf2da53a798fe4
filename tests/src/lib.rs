//! # Courier Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── fixtures.rs       # Peer harness shared by scenarios and benches
//! │   └── integration/      # Cross-crate scenarios
//! │       ├── echo.rs       # Runtime + Echo service over remote sessions
//! │       ├── fan_out.rs    # Local and remote fan-out, disconnects
//! │       ├── retry.rs      # Bounded retry and late targets
//! │       ├── housekeeping.rs
//! │       └── telemetry.rs  # Prometheus monitor against a live bus
//! └── benches/
//!     └── dispatch_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p courier-tests
//!
//! # By scenario
//! cargo test -p courier-tests integration::retry::
//!
//! # Benchmarks
//! cargo bench -p courier-tests
//! ```

pub mod fixtures;
pub mod integration;
