//! # Message Queue
//!
//! Per-session bounded, ordered outbound buffer.
//!
//! ```text
//! [Provisioned] ──finish_init──→ [Active] ──stop_queue──→ [Closed]
//!       │                                                    ↑
//!       └──────────────── stop_queue (evicted) ──────────────┘
//! ```
//!
//! A `Provisioned` queue only accepts handshake traffic; everything else is
//! held in its [`DeferredBuffer`] until `finish_init()` drains it.
//! The buffer, deferred buffer and activity timestamp share one lock per
//! queue. It is always the innermost lock: nothing else is acquired while it
//! is held.

use crate::deferred::DeferredBuffer;
use crate::errors::BusError;
use crate::message::{Message, RoutingFlag};
use crate::session::SessionId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Queue lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Created on connect; handshake not finished.
    Provisioned,
    /// Handshake finished; accepts offers.
    Active,
    /// Terminal.
    Closed,
}

/// Where an enqueued message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended to the outbound buffer.
    Accepted,
    /// Held in the deferred buffer until the handshake finishes.
    Deferred,
}

/// An offer the queue turned down, handed back with its message.
#[derive(Debug)]
pub struct Rejected {
    pub error: BusError,
    pub message: Message,
}

#[derive(Debug)]
struct QueueInner {
    state: QueueState,
    buffer: VecDeque<Message>,
    deferred: DeferredBuffer,
    last_activity: Instant,
}

/// Bounded outbound queue for one session.
#[derive(Debug)]
pub struct MessageQueue {
    session_id: SessionId,
    capacity: usize,
    stale_window: Duration,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl MessageQueue {
    /// Create a provisioned queue.
    #[must_use]
    pub fn new(session_id: SessionId, capacity: usize, stale_window: Duration) -> Self {
        Self {
            session_id,
            capacity,
            stale_window,
            inner: Mutex::new(QueueInner {
                state: QueueState::Provisioned,
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                deferred: DeferredBuffer::new(),
                last_activity: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    /// Whether the handshake finished and the queue is still open.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == QueueState::Active
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == QueueState::Closed
    }

    /// Messages waiting in the outbound buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages waiting in the deferred buffer.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.inner.lock().deferred.len()
    }

    /// Copy of the outbound buffer, head first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().buffer.iter().cloned().collect()
    }

    // =========================================================================
    // ENQUEUE
    // =========================================================================

    /// Append `message` to the tail.
    ///
    /// # Errors
    ///
    /// - `QueueClosed` once the queue is closed
    /// - `QueueNotReady` while provisioned, unless the message is handshake traffic
    /// - `QueueOverloaded` when the buffer is at capacity
    pub fn offer(&self, message: Message) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        match inner.state {
            QueueState::Closed => return Err(self.closed()),
            QueueState::Provisioned if !message.is_flag_set(RoutingFlag::Handshake) => {
                return Err(BusError::QueueNotReady {
                    session_id: self.session_id.clone(),
                });
            }
            _ => {}
        }
        self.push_locked(&mut inner, message)
            .map_err(|_| self.overloaded())?;
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Offer, or hold in the deferred buffer while the handshake is pending.
    ///
    /// The state check and the append happen under one lock, so a concurrent
    /// `finish_init()` cannot strand a message in the deferred buffer.
    ///
    /// # Errors
    ///
    /// Same as [`offer`](Self::offer), except that `QueueNotReady` becomes
    /// `Ok(Enqueued::Deferred)`. A rejected message is handed back.
    pub fn offer_or_defer(&self, message: Message) -> Result<Enqueued, Rejected> {
        let mut inner = self.inner.lock();
        match inner.state {
            QueueState::Closed => Err(Rejected {
                error: self.closed(),
                message,
            }),
            QueueState::Provisioned if !message.is_flag_set(RoutingFlag::Handshake) => {
                inner.deferred.push(message);
                Ok(Enqueued::Deferred)
            }
            _ => {
                self.push_locked(&mut inner, message)
                    .map_err(|message| Rejected {
                        error: self.overloaded(),
                        message,
                    })?;
                drop(inner);
                self.notify.notify_one();
                Ok(Enqueued::Accepted)
            }
        }
    }

    fn push_locked(&self, inner: &mut QueueInner, message: Message) -> Result<(), Message> {
        if inner.buffer.len() >= self.capacity {
            return Err(message);
        }
        inner.buffer.push_back(message);
        inner.last_activity = Instant::now();
        Ok(())
    }

    fn overloaded(&self) -> BusError {
        BusError::QueueOverloaded {
            session_id: self.session_id.clone(),
            capacity: self.capacity,
        }
    }

    fn closed(&self) -> BusError {
        BusError::QueueClosed {
            session_id: self.session_id.clone(),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Record peer activity.
    pub fn heart_beat(&self) {
        self.inner.lock().last_activity = Instant::now();
    }

    /// Whether no activity was seen within the stale window.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner.lock().last_activity.elapsed() > self.stale_window
    }

    /// Finish the handshake: `Provisioned → Active`, then drain the deferred
    /// buffer into the outbound buffer (priority messages first).
    ///
    /// Returns the drained messages that did not fit. A closed queue is left
    /// untouched and returns nothing.
    pub fn finish_init(&self) -> Vec<Message> {
        let mut inner = self.inner.lock();
        if inner.state == QueueState::Closed {
            return Vec::new();
        }
        inner.state = QueueState::Active;
        inner.last_activity = Instant::now();

        let mut rejected = Vec::new();
        for message in inner.deferred.drain_prioritized() {
            if inner.buffer.len() >= self.capacity {
                rejected.push(message);
            } else {
                inner.buffer.push_back(message);
            }
        }
        drop(inner);
        self.notify.notify_one();
        rejected
    }

    /// Close the queue and discard its deferred buffer. Idempotent.
    pub fn stop_queue(&self) {
        let mut inner = self.inner.lock();
        inner.state = QueueState::Closed;
        inner.deferred.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Take the deferred buffer, leaving an empty one behind.
    pub fn take_deferred(&self) -> DeferredBuffer {
        std::mem::take(&mut self.inner.lock().deferred)
    }

    /// Prepend a deferred buffer migrated from a previous queue.
    pub fn adopt_deferred(&self, mut previous: DeferredBuffer) {
        let mut inner = self.inner.lock();
        let own = std::mem::take(&mut inner.deferred);
        previous.extend(own);
        inner.deferred = previous;
    }

    /// Remove pending messages for `subject` from both buffers.
    pub fn purge_subject(&self, subject: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.buffer.len();
        inner.buffer.retain(|m| m.subject() != subject);
        let purged = before - inner.buffer.len();
        purged + inner.deferred.purge_subject(subject)
    }

    // =========================================================================
    // CONSUMPTION (transport side)
    // =========================================================================

    /// Take up to `max` messages from the head. Counts as activity.
    pub fn poll(&self, max: usize) -> Vec<Message> {
        let mut inner = self.inner.lock();
        inner.last_activity = Instant::now();
        let n = max.min(inner.buffer.len());
        inner.buffer.drain(..n).collect()
    }

    /// Long poll: wait up to `timeout` for messages, then take them all.
    ///
    /// Returns early once the buffer is non-empty or the queue closes. A
    /// wake-up that finds the buffer empty (a permit left by an earlier
    /// offer, or messages another consumer already took) keeps waiting.
    pub async fn wait_for_messages(&self, timeout: Duration) -> Vec<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so an offer in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if !inner.buffer.is_empty() || inner.state == QueueState::Closed {
                    drop(inner);
                    return self.poll(usize::MAX);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.poll(usize::MAX);
            }
        }
    }
}
