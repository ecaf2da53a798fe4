//! # Bus Errors
//!
//! Every failure the routing core can produce. Only `ReservedSubject`,
//! `UnknownSubject`, `MessageCommitted` and `BusStopped` are returned to the
//! caller synchronously; the delivery-path variants are handed to the
//! [`FailureHandler`](crate::failure::FailureHandler) instead.

use crate::session::SessionId;
use thiserror::Error;

/// Errors from bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The subject was locked when the bus finished initializing.
    #[error("cannot modify or subscribe to reserved service: {subject}")]
    ReservedSubject { subject: String },

    /// A rule was added for a subject that has no delivery plan.
    #[error("no such subject: {subject}")]
    UnknownSubject { subject: String },

    /// No local or remote subscriber appeared within the retry budget.
    #[error("no subscribers to deliver to for subject: {subject}")]
    NoSubscribersToDeliver { subject: String },

    /// A directed send referenced a session without a live queue.
    #[error("no queue available to send (session {session_id} may have expired)")]
    QueueUnavailable { session_id: SessionId },

    /// The target queue is at capacity.
    #[error("queue overloaded (session id={session_id}, capacity={capacity})")]
    QueueOverloaded {
        session_id: SessionId,
        capacity: usize,
    },

    /// The target queue was already closed.
    #[error("queue closed (session id={session_id})")]
    QueueClosed { session_id: SessionId },

    /// The queue has not finished its handshake; the message must be deferred.
    #[error("queue not ready (session id={session_id})")]
    QueueNotReady { session_id: SessionId },

    /// Subject or command was changed after `commit()`.
    #[error("message already committed; subject and command are immutable")]
    MessageCommitted,

    /// The bus was stopped.
    #[error("bus stopped")]
    BusStopped,
}

impl BusError {
    /// Short stable label, used for log fields and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReservedSubject { .. } => "reserved_subject",
            Self::UnknownSubject { .. } => "unknown_subject",
            Self::NoSubscribersToDeliver { .. } => "no_subscribers",
            Self::QueueUnavailable { .. } => "queue_unavailable",
            Self::QueueOverloaded { .. } => "queue_overloaded",
            Self::QueueClosed { .. } => "queue_closed",
            Self::QueueNotReady { .. } => "queue_not_ready",
            Self::MessageCommitted => "message_committed",
            Self::BusStopped => "bus_stopped",
        }
    }
}
