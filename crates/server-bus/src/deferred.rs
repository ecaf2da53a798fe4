//! Deferred delivery buffer.
//!
//! Holds messages that reach a queue before its handshake finished. Lives
//! inside the queue's own lock.

use crate::message::Message;

/// Arrival-ordered holding area for one queue.
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    messages: Vec<Message>,
}

impl DeferredBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in arrival order.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append another buffer's messages after this one's.
    pub fn extend(&mut self, other: DeferredBuffer) {
        self.messages.extend(other.messages);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop everything held.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Take everything out: priority messages first, then the rest, each
    /// group in arrival order. The buffer is left empty.
    pub fn drain_prioritized(&mut self) -> Vec<Message> {
        let (mut priority, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(Message::is_priority);
        priority.extend(rest);
        priority
    }

    /// Remove held messages for `subject`; returns how many were dropped.
    pub fn purge_subject(&mut self, subject: &str) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.subject() != subject);
        before - self.messages.len()
    }
}
