//! # Server Bus - Publish/Subscribe Routing Core
//!
//! Multiplexes messages between local service handlers and remote client
//! sessions. Each remote session owns a bounded, ordered [`MessageQueue`].
//!
//! ## Architecture
//!
//! ```text
//!  producers ──send()──┐                     ┌──→ local handlers
//!                      ▼                     │
//!               ┌──────────────┐   plan   ┌──┴───────────┐
//!  transport ──→│  ServerBus   │─────────→│ DeliveryPlan │
//!               └──────┬───────┘          └──┬───────────┘
//!                      │ directed            └──→ RemoteFanout ──┐
//!                      ▼                                         ▼
//!               ┌──────────────┐  Provisioned  ┌────────────────┐
//!               │ MessageQueue │──────────────→│ DeferredBuffer │
//!               └──────────────┘               └────────────────┘
//!                      ▲
//!               Housekeeper (evicts stale queues)
//! ```
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Fan-out completeness | every plan target is invoked once per send |
//! | Per-queue order | one inbox + worker task per queue |
//! | Deferred drain | priority messages first, arrival order within groups |
//! | Bounded retry | fixed interval, fixed attempt bound, one terminal failure |
//! | Target isolation | a failing handler or queue never blocks the others |
//!
//! Messages are transient and in-memory; delivery is ordered and attempted,
//! not exactly-once.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod deferred;
pub mod errors;
pub mod failure;
pub mod listeners;
pub mod message;
pub mod monitor;
pub mod plan;
pub mod queue;
pub mod remote;
pub mod session;

pub use bus::{BusStats, ServerBus};
pub use config::{BusConfig, ConfigError, RetryPolicy, DEFAULT_QUEUE_SIZE};
pub use deferred::DeferredBuffer;
pub use errors::BusError;
pub use failure::{DeliveryFailure, FailureHandler, FailureLog, LoggingFailureHandler};
pub use listeners::{
    ListenerAction, MessageListener, QueueClosedEvent, QueueClosedListener, SubscribeListener,
    SubscriptionEvent, UnsubscribeListener,
};
pub use message::{parts, Capabilities, ControlCommand, Message, RoutingFlag, RoutingFlags};
pub use monitor::BusMonitor;
pub use plan::{handler, Delivery, DeliveryPlan, DeliveryTarget, MessageCallback};
pub use queue::{Enqueued, MessageQueue, QueueState, Rejected};
pub use remote::RemoteFanout;
pub use session::{LocalSession, QueueSession, SessionId, SessionRef};

/// Bus-internal control subject; reserved from construction.
pub const SERVER_BUS_SUBJECT: &str = "ServerBus";

/// Subject every connected queue is remotely subscribed to.
pub const CLIENT_BUS_SUBJECT: &str = "ClientBus";

/// Subjects with this prefix are never advertised to remote peers.
pub const LOCAL_PREFIX: &str = "local:";
