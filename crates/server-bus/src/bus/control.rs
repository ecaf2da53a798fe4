//! `ServerBus` control subject.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `Heartbeat` | refresh the sender's queue |
//! | `RemoteSubscribe` | `Subject` or `SubjectsList` become fan-out targets |
//! | `RemoteUnsubscribe` | withdraw `Subject` |
//! | `FinishStateSync` | activate the queue, drain its deferred buffer |
//! | `Disconnect` | close the sender's queue |
//! | `ConnectToQueue` | provision a queue and run the handshake |
//!
//! Anything else is logged and reported to the failure handler.

use super::routing::run_inbox;
use super::{QueueEntry, ServerBus};
use crate::errors::BusError;
use crate::message::{parts, Capabilities, ControlCommand, Message, RoutingFlag};
use crate::plan::MessageCallback;
use crate::queue::MessageQueue;
use crate::session::{SessionId, SessionRef};
use crate::{CLIENT_BUS_SUBJECT, LOCAL_PREFIX};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Local handler bound to the `ServerBus` subject.
pub(super) struct ControlHandler;

impl MessageCallback for ControlHandler {
    fn callback(&self, bus: &ServerBus, message: &Message) -> Result<(), BusError> {
        bus.handle_control(message)
    }
}

impl ServerBus {
    fn handle_control(&self, message: &Message) -> Result<(), BusError> {
        let command = ControlCommand::of(message);
        let session = message.session().cloned();

        match (&command, session) {
            (ControlCommand::ConnectToQueue, Some(session)) => {
                self.connect(session);
                Ok(())
            }
            (ControlCommand::Heartbeat, Some(session)) => {
                let queue = self.require_queue(session.session_id())?;
                queue.heart_beat();
                Ok(())
            }
            (ControlCommand::RemoteSubscribe, Some(session)) => {
                let session_id = session.session_id();
                if let Some(subject) = message.get::<String>(parts::SUBJECT) {
                    self.remote_subscribe(session_id, &subject)?;
                }
                if let Some(subjects) = message.get::<Vec<String>>(parts::SUBJECTS_LIST) {
                    for subject in &subjects {
                        self.remote_subscribe(session_id, subject)?;
                    }
                }
                Ok(())
            }
            (ControlCommand::RemoteUnsubscribe, Some(session)) => {
                if let Some(subject) = message.get::<String>(parts::SUBJECT) {
                    self.remote_unsubscribe(session.session_id(), &subject);
                }
                Ok(())
            }
            (ControlCommand::FinishStateSync, Some(session)) => {
                let queue = self.require_queue(session.session_id())?;
                let overflow = queue.finish_init();
                info!(session_id = %queue.session_id(), overflow = overflow.len(), "Queue handshake finished");
                for message in overflow {
                    let error = BusError::QueueOverloaded {
                        session_id: queue.session_id().clone(),
                        capacity: queue.capacity(),
                    };
                    self.report_failure(message, error.to_string(), Some(error), false);
                }
                Ok(())
            }
            (ControlCommand::Disconnect, Some(session)) => {
                info!(session_id = %session.session_id(), "Peer disconnected");
                self.close_queue(session.session_id());
                Ok(())
            }
            (ControlCommand::Heartbeat
                | ControlCommand::RemoteSubscribe
                | ControlCommand::RemoteUnsubscribe
                | ControlCommand::FinishStateSync
                | ControlCommand::Disconnect
                | ControlCommand::ConnectToQueue, None) => {
                warn!(command = %command, "Control command without a session");
                self.report_failure(
                    message.clone(),
                    format!("control command {command} requires a session"),
                    None,
                    false,
                );
                Ok(())
            }
            (ControlCommand::CapabilitiesNotice
                | ControlCommand::MessageNotDelivered
                | ControlCommand::Unknown(_), _) => {
                warn!(command = %command, "Unhandled control command");
                self.report_failure(
                    message.clone(),
                    format!("unhandled control command: {command}"),
                    None,
                    false,
                );
                Ok(())
            }
        }
    }

    fn require_queue(&self, session_id: &SessionId) -> Result<Arc<MessageQueue>, BusError> {
        self.queue(session_id)
            .ok_or_else(|| BusError::QueueUnavailable {
                session_id: session_id.clone(),
            })
    }

    // =========================================================================
    // CONNECT
    // =========================================================================

    /// Provision a fresh queue for `session`, taking over the deferred buffer
    /// of any queue it replaces, and start the handshake.
    pub fn connect(&self, session: SessionRef) -> Arc<MessageQueue> {
        let session_id = session.session_id().clone();
        let config = &self.inner.config;
        let queue = Arc::new(MessageQueue::new(
            session_id.clone(),
            config.queue_size,
            config.stale_window,
        ));
        let (inbox, inbox_rx) = mpsc::unbounded_channel();

        let replaced = {
            let mut queues = self.inner.queues.write();
            let previous = queues.insert(
                session_id.clone(),
                QueueEntry {
                    queue: Arc::clone(&queue),
                    session: Arc::clone(&session),
                    inbox,
                },
            );
            if let Some(previous) = &previous {
                queue.adopt_deferred(previous.queue.take_deferred());
                previous.queue.stop_queue();
            }
            previous.is_some()
        };

        self.inner.runtime.spawn(run_inbox(
            Arc::downgrade(&self.inner),
            Arc::clone(&queue),
            inbox_rx,
        ));
        info!(session_id = %session_id, replaced, "Queue provisioned");
        self.with_monitor(|m| m.notify_queue_attached(&session_id));

        if let Err(e) = self.remote_subscribe(&session_id, CLIENT_BUS_SUBJECT) {
            warn!(session_id = %session_id, error = %e, "Could not subscribe queue to client bus");
        }
        self.send_handshake(&session, &queue);
        queue
    }

    /// Outbound handshake: unclaimed subjects, capabilities, state sync.
    fn send_handshake(&self, session: &SessionRef, queue: &MessageQueue) {
        let subjects = self.advertised_subjects();
        debug!(session_id = %queue.session_id(), subjects = subjects.len(), "Sending handshake");

        let subscribe = Message::control(CLIENT_BUS_SUBJECT, ControlCommand::RemoteSubscribe)
            .with(parts::SUBJECTS_LIST, subjects)
            .with_priority();

        let capabilities = Message::control(CLIENT_BUS_SUBJECT, ControlCommand::CapabilitiesNotice);
        let capabilities = if self.inner.config.long_polling {
            capabilities.with(parts::FLAGS, Capabilities::LongPollAvailable.as_str())
        } else {
            let poll_ms = u64::try_from(self.inner.config.poll_frequency().as_millis())
                .unwrap_or(u64::MAX);
            capabilities
                .with(parts::FLAGS, Capabilities::NoLongPollAvailable.as_str())
                .with(parts::POLL_FREQUENCY, poll_ms)
        };

        let finish = Message::control(CLIENT_BUS_SUBJECT, ControlCommand::FinishStateSync);

        for message in [subscribe, capabilities, finish] {
            let mut message = message
                .with_flag(RoutingFlag::Handshake)
                .with_session(Arc::clone(session));
            message.commit();
            self.forward_to_session(queue.session_id(), message);
        }
    }

    /// Locally handled subjects a peer may subscribe to, sorted.
    fn advertised_subjects(&self) -> Vec<String> {
        let subscriptions = self.inner.subscriptions.read();
        let remotes = self.inner.remote_subscriptions.read();
        let mut subjects: Vec<String> = subscriptions
            .iter()
            .filter(|(subject, plan)| {
                plan.local_count() > 0
                    && !subject.starts_with(LOCAL_PREFIX)
                    && !remotes.contains_key(subject.as_str())
            })
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects.sort();
        subjects
    }
}
