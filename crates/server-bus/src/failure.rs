//! # Failure Boundary
//!
//! Every delivery-path failure ends up here instead of at the producer:
//! exhausted retries, overloaded or closed queues, vetoed control traffic and
//! handler errors. A deployment picks log-and-drop, alerting or escalation by
//! installing its own [`FailureHandler`].

use crate::bus::ServerBus;
use crate::errors::BusError;
use crate::message::Message;
use parking_lot::Mutex;
use tracing::error;

/// One unrecoverable delivery failure.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// The message that could not be delivered.
    pub message: Message,
    /// Human-readable reason.
    pub reason: String,
    /// Underlying error, if any.
    pub error: Option<BusError>,
    /// The failure should stop the sending session.
    pub stop: bool,
}

pub trait FailureHandler: Send + Sync {
    fn on_delivery_failure(&self, bus: &ServerBus, failure: DeliveryFailure);
}

impl<F> FailureHandler for F
where
    F: Fn(&ServerBus, DeliveryFailure) + Send + Sync,
{
    fn on_delivery_failure(&self, bus: &ServerBus, failure: DeliveryFailure) {
        self(bus, failure);
    }
}

/// Default handler: log and drop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFailureHandler;

impl FailureHandler for LoggingFailureHandler {
    fn on_delivery_failure(&self, _bus: &ServerBus, failure: DeliveryFailure) {
        error!(
            subject = %failure.message.subject(),
            message_id = %failure.message.id(),
            session_id = ?failure.message.session_id(),
            kind = failure.error.as_ref().map_or("none", BusError::kind),
            stop = failure.stop,
            "Delivery failed: {}",
            failure.reason
        );
    }
}

/// Handler that keeps every failure for later inspection.
#[derive(Debug, Default)]
pub struct FailureLog {
    failures: Mutex<Vec<DeliveryFailure>>,
}

impl FailureLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the recorded failures, oldest first.
    #[must_use]
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.failures.lock().clone()
    }

    /// Recorded errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<BusError> {
        self.failures
            .lock()
            .iter()
            .filter_map(|f| f.error.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureHandler for FailureLog {
    fn on_delivery_failure(&self, _bus: &ServerBus, failure: DeliveryFailure) {
        self.failures.lock().push(failure);
    }
}
