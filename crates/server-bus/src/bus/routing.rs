//! Send paths, async hand-off and the retry-or-fail policy.

use super::{BusInner, QueueEntry, ServerBus};
use crate::errors::BusError;
use crate::failure::DeliveryFailure;
use crate::message::{parts, ControlCommand, Message, RoutingFlag};
use crate::queue::{Enqueued, MessageQueue, Rejected};
use crate::session::SessionId;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What a scheduled retry re-attempts.
#[derive(Debug, Clone)]
pub(crate) enum RetryTarget {
    /// Broadcast through the subject's delivery plan.
    Global,
    /// Directed delivery to one session's queue.
    Session(SessionId),
}

impl ServerBus {
    // =========================================================================
    // PUBLIC SEND API
    // =========================================================================

    /// Commit and route `message`.
    ///
    /// A message with a session resource, or else a `SessionID` part, is sent
    /// to that session's queue. Anything else is broadcast with
    /// [`send_global`](Self::send_global).
    ///
    /// # Errors
    ///
    /// `BusError::BusStopped` after [`stop`](Self::stop). Delivery failures
    /// go to the failure handler, never back to the caller.
    pub fn send(&self, mut message: Message) -> Result<(), BusError> {
        message.commit();
        self.ensure_running()?;

        let directed = message
            .session_id()
            .cloned()
            .or_else(|| message.get::<String>(parts::SESSION_ID).map(SessionId::from));
        match directed {
            Some(session_id) => self.route_directed(&session_id, message),
            None => self.route_global(message),
        }
        Ok(())
    }

    /// Commit and broadcast `message` to every local and remote subscriber
    /// of its subject.
    ///
    /// # Errors
    ///
    /// `BusError::BusStopped` after [`stop`](Self::stop).
    pub fn send_global(&self, mut message: Message) -> Result<(), BusError> {
        message.commit();
        self.ensure_running()?;
        self.route_global(message);
        Ok(())
    }

    /// Entry point for the transport: a message sent by a remote peer.
    ///
    /// Marks the message as remote, counts it as activity of the sender's
    /// queue and broadcasts it.
    ///
    /// # Errors
    ///
    /// `BusError::BusStopped` after [`stop`](Self::stop).
    pub fn deliver_from_remote(&self, mut message: Message) -> Result<(), BusError> {
        message.set_flag(RoutingFlag::FromRemote);
        if let Some(queue) = message.session_id().and_then(|id| self.queue(id)) {
            queue.heart_beat();
        }
        self.send_global(message)
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.is_stopped() {
            return Err(BusError::BusStopped);
        }
        Ok(())
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    pub(crate) fn route_global(&self, message: Message) {
        let plan = self
            .inner
            .subscriptions
            .read()
            .get(message.subject())
            .cloned();
        let Some(plan) = plan else {
            debug!(subject = %message.subject(), "No subscribers; scheduling retry");
            self.delay_or_fail(message, RetryTarget::Global);
            return;
        };

        if !self.allowed(&message) {
            return;
        }

        if message.is_flag_set(RoutingFlag::FromRemote) {
            self.with_monitor(|m| m.notify_incoming_from_remote(message.session_id(), &message));
        } else {
            self.with_monitor(|m| m.notify_in_bus_message(&message));
        }

        let delivery = plan.deliver(self, &message);
        if delivery.rejected {
            debug!(subject = %message.subject(), "Delivery rule rejected message");
        }
        for error in delivery.failures {
            self.report_failure(message.clone(), error.to_string(), Some(error), false);
        }
    }

    pub(crate) fn route_directed(&self, session_id: &SessionId, message: Message) {
        if self.entry(session_id).is_some() && !self.allowed(&message) {
            return;
        }
        self.forward_to_session(session_id, message);
    }

    /// Directed delivery without consulting global listeners; used by remote
    /// fan-out and by the directed path once listeners agreed.
    pub(crate) fn forward_to_session(&self, session_id: &SessionId, message: Message) {
        match self.entry(session_id) {
            Some(entry) => {
                self.with_monitor(|m| m.notify_outgoing_to_remote(session_id, &message));
                self.hand_off(&entry, message);
            }
            None => {
                debug!(session_id = %session_id, subject = %message.subject(), "No queue for session; scheduling retry");
                self.delay_or_fail(message, RetryTarget::Session(session_id.clone()));
            }
        }
    }

    /// Push onto the queue's inbox; the queue's worker task does the offer.
    pub(crate) fn hand_off(&self, entry: &QueueEntry, message: Message) {
        if let Err(mpsc::error::SendError(message)) = entry.inbox.send(message) {
            let error = BusError::QueueClosed {
                session_id: entry.queue.session_id().clone(),
            };
            self.report_failure(message, error.to_string(), Some(error), false);
        }
    }

    /// Offer to an active queue, defer while provisioned, report otherwise.
    pub(crate) fn enqueue_for_delivery(&self, queue: &MessageQueue, message: Message) {
        let message_id = message.id();
        match queue.offer_or_defer(message) {
            Ok(Enqueued::Accepted) => {
                self.inner.stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %queue.session_id(), message_id = %message_id, "Message enqueued");
            }
            Ok(Enqueued::Deferred) => {
                self.inner.stats.deferred.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %queue.session_id(), message_id = %message_id, "Message deferred until handshake completes");
            }
            Err(Rejected { error, message }) => {
                self.report_failure(message, error.to_string(), Some(error), false);
            }
        }
    }

    /// Consult global listeners. On a veto, a message that expects a reply
    /// gets a `MessageNotDelivered` back on the sender's queue.
    fn allowed(&self, message: &Message) -> bool {
        if self.inner.global_listeners.allow(message) {
            return true;
        }

        debug!(subject = %message.subject(), message_id = %message.id(), "Message vetoed by global listener");
        if message.has_part(parts::REPLY_TO) {
            if let Some(entry) = message.session_id().and_then(|id| self.entry(id)) {
                let mut notice = Message::conversation(message)
                    .with_command(ControlCommand::MessageNotDelivered.as_str());
                notice.commit();
                self.hand_off(&entry, notice);
            }
        }
        false
    }

    // =========================================================================
    // RETRY-OR-FAIL
    // =========================================================================

    /// Schedule a one-shot retry, or raise the terminal failure once the
    /// policy's bound is reached.
    pub(crate) fn delay_or_fail(&self, mut message: Message, target: RetryTarget) {
        let policy = self.inner.config.retry_policy_for(message.is_priority());
        let attempts = message.retry_attempts();

        if attempts >= policy.max_attempts || self.is_stopped() {
            let error = match target {
                RetryTarget::Global => BusError::NoSubscribersToDeliver {
                    subject: message.subject().to_string(),
                },
                RetryTarget::Session(session_id) => BusError::QueueUnavailable { session_id },
            };
            warn!(
                subject = %message.subject(),
                attempt = attempts,
                "Giving up on delivery: {}",
                error
            );
            self.report_failure(message, error.to_string(), Some(error), false);
            return;
        }

        message.set_retry_attempts(attempts + 1);
        message.set_flag(RoutingFlag::RetryDelivery);
        self.inner.stats.retried.fetch_add(1, Ordering::Relaxed);
        debug!(
            subject = %message.subject(),
            attempt = attempts + 1,
            delay_ms = policy.interval.as_millis() as u64,
            "Retry scheduled"
        );

        let bus: Weak<BusInner> = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(policy.interval).await;
            let Some(inner) = bus.upgrade() else {
                return;
            };
            let bus = ServerBus::from_inner(inner);
            if bus.is_stopped() {
                let error = BusError::BusStopped;
                bus.report_failure(message, error.to_string(), Some(error), false);
                return;
            }
            match target {
                RetryTarget::Global => bus.route_global(message),
                RetryTarget::Session(session_id) => bus.route_directed(&session_id, message),
            }
        });
    }

    // =========================================================================
    // FAILURE BOUNDARY
    // =========================================================================

    pub(crate) fn report_failure(
        &self,
        message: Message,
        reason: String,
        error: Option<BusError>,
        stop: bool,
    ) {
        self.inner.stats.failed.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&*self.inner.failure_handler.read());
        handler.on_delivery_failure(
            self,
            DeliveryFailure {
                message,
                reason,
                error,
                stop,
            },
        );
    }
}

/// Worker task: drain one queue's inbox in order.
pub(crate) async fn run_inbox(
    bus: Weak<BusInner>,
    queue: Arc<MessageQueue>,
    mut inbox: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = inbox.recv().await {
        let Some(inner) = bus.upgrade() else {
            break;
        };
        ServerBus::from_inner(inner).enqueue_for_delivery(&queue, message);
    }
    debug!(session_id = %queue.session_id(), "Queue worker finished");
}
