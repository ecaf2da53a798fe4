//! Remote fan-out target.
//!
//! One instance per subject. It remembers the session ids of the queues
//! remotely subscribed to that subject and re-dispatches every delivered
//! message to each of them through the directed path.

use crate::bus::ServerBus;
use crate::message::Message;
use crate::session::SessionId;
use parking_lot::RwLock;

/// Set of remote queues subscribed to one subject.
#[derive(Debug)]
pub struct RemoteFanout {
    subject: String,
    queues: RwLock<Vec<SessionId>>,
}

impl RemoteFanout {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            queues: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Add a queue; `false` if it was already a target.
    pub fn add(&self, session_id: &SessionId) -> bool {
        let mut queues = self.queues.write();
        if queues.contains(session_id) {
            return false;
        }
        queues.push(session_id.clone());
        true
    }

    /// Remove a queue; `false` if it was not a target.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        let mut queues = self.queues.write();
        let before = queues.len();
        queues.retain(|id| id != session_id);
        queues.len() != before
    }

    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.queues.read().contains(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    /// Current targets.
    #[must_use]
    pub fn targets(&self) -> Vec<SessionId> {
        self.queues.read().clone()
    }

    /// Hand a copy of `message` to every target queue.
    ///
    /// Works on a snapshot of the target set; queues that vanish in between
    /// fall into the retry path.
    pub fn fan_out(&self, bus: &ServerBus, message: &Message) {
        for session_id in self.targets() {
            bus.forward_to_session(&session_id, message.clone());
        }
    }
}
