//! # Queue Sessions
//!
//! Sessions are owned by the transport layer. The bus keeps an
//! `Arc<dyn QueueSession>` per queue, keyed by [`SessionId`], and queues only
//! remember the id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A transport session the bus can route to and end.
pub trait QueueSession: Send + Sync + fmt::Debug {
    /// Unique id of this session.
    fn session_id(&self) -> &SessionId;

    /// Called when the bus evicts or closes the session's queue.
    fn end_session(&self);
}

/// Shared session reference carried in message resources.
pub type SessionRef = Arc<dyn QueueSession>;

/// Session with no transport behind it.
///
/// Useful for in-process peers and tests; records whether it was ended.
#[derive(Debug)]
pub struct LocalSession {
    id: SessionId,
    ended: std::sync::atomic::AtomicBool,
}

impl LocalSession {
    /// Create a session with the given id.
    pub fn new(id: impl Into<SessionId>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            ended: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Create a session with a random id.
    pub fn random() -> Arc<Self> {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Whether `end_session` has been called.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl QueueSession for LocalSession {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn end_session(&self) {
        self.ended.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}
