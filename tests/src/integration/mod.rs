//! # Integration Scenarios
//!
//! Cross-crate flows: a bus (optionally hosted by the runtime) driven by
//! in-process peers through the control subject.

pub mod echo;
pub mod fan_out;
pub mod housekeeping;
pub mod retry;
pub mod telemetry;
