//! # Messages
//!
//! The envelope that flows through the bus: a subject, an optional command,
//! named parts (JSON values), transient resources and routing flags.
//!
//! ## Commit
//!
//! `commit()` freezes the subject and command. Parts, flags and resources may
//! still change, which is how the retry path records its attempt counter on
//! the message between delivery attempts.

use crate::errors::BusError;
use crate::session::{SessionId, SessionRef};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Well-known part names.
pub mod parts {
    /// Single subject carried by `RemoteSubscribe`/`RemoteUnsubscribe`.
    pub const SUBJECT: &str = "Subject";
    /// List of subjects carried by `RemoteSubscribe`.
    pub const SUBJECTS_LIST: &str = "SubjectsList";
    /// Presence marks a message for priority draining and retry policy.
    pub const PRIORITY_PROCESSING: &str = "PriorityProcessing";
    /// Subject a conversation reply should go to.
    pub const REPLY_TO: &str = "ReplyTo";
    /// Session id used for directed sends when no session resource is set.
    pub const SESSION_ID: &str = "SessionID";
    /// Capability flags in a `CapabilitiesNotice`.
    pub const FLAGS: &str = "Flags";
    /// Poll interval (ms) in a `CapabilitiesNotice`.
    pub const POLL_FREQUENCY: &str = "PollFrequency";
}

/// Routing bits set on a message by the bus or the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoutingFlag {
    /// The message arrived from a remote session.
    FromRemote = 0b0001,
    /// A retry of this message is in progress.
    RetryDelivery = 0b0010,
    /// Connect-path traffic a provisioned queue accepts before its handshake finishes.
    Handshake = 0b0100,
}

/// Set of [`RoutingFlag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingFlags(u8);

impl RoutingFlags {
    /// Empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether `flag` is set.
    #[must_use]
    pub const fn contains(self, flag: RoutingFlag) -> bool {
        self.0 & flag as u8 != 0
    }

    /// Set `flag`.
    pub fn insert(&mut self, flag: RoutingFlag) {
        self.0 |= flag as u8;
    }

    /// Clear `flag`.
    pub fn remove(&mut self, flag: RoutingFlag) {
        self.0 &= !(flag as u8);
    }
}

/// Transient, never-serialized per-message state.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    /// Session the message came from or is directed to.
    pub session: Option<SessionRef>,
    /// Number of retries already scheduled for this message.
    pub retry_attempts: u32,
}

/// A bus message.
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    subject: String,
    command: Option<String>,
    parts: HashMap<String, Value>,
    resources: Resources,
    flags: RoutingFlags,
    committed: bool,
}

impl Message {
    /// Create an uncommitted message for `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            command: None,
            parts: HashMap::new(),
            resources: Resources::default(),
            flags: RoutingFlags::empty(),
            committed: false,
        }
    }

    /// Create a control message for `subject` carrying `command`.
    pub fn control(subject: impl Into<String>, command: ControlCommand) -> Self {
        Self::new(subject).with_command(command.as_str())
    }

    /// Start a reply to `incoming`.
    ///
    /// The reply carries the same session and is addressed to the incoming
    /// `ReplyTo` part if present, otherwise to the incoming subject.
    #[must_use]
    pub fn conversation(incoming: &Message) -> Self {
        let subject = incoming
            .get::<String>(parts::REPLY_TO)
            .unwrap_or_else(|| incoming.subject.clone());
        let mut reply = Self::new(subject);
        reply.resources.session = incoming.resources.session.clone();
        reply
    }

    // =========================================================================
    // BUILDERS
    // =========================================================================

    /// Set the command on an uncommitted message.
    ///
    /// A committed message (or a clone of one) keeps its command; use
    /// [`set_command`](Self::set_command) to have that reported as an error.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        if !self.committed {
            self.command = Some(command.into());
        }
        self
    }

    /// Set a part.
    #[must_use]
    pub fn with(mut self, part: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts.insert(part.into(), value.into());
        self
    }

    /// Attach a session resource.
    #[must_use]
    pub fn with_session(mut self, session: SessionRef) -> Self {
        self.resources.session = Some(session);
        self
    }

    /// Set a routing flag.
    #[must_use]
    pub fn with_flag(mut self, flag: RoutingFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Mark the message for priority processing.
    #[must_use]
    pub fn with_priority(self) -> Self {
        self.with(parts::PRIORITY_PROCESSING, "1")
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Unique id, assigned at creation.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Raw part value.
    #[must_use]
    pub fn part(&self, name: &str) -> Option<&Value> {
        self.parts.get(name)
    }

    /// Part decoded into `T`; `None` if absent or of the wrong shape.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.parts
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    #[must_use]
    pub fn has_part(&self, name: &str) -> bool {
        self.parts.contains_key(name)
    }

    #[must_use]
    pub fn parts(&self) -> &HashMap<String, Value> {
        &self.parts
    }

    /// Set or replace a part. Allowed after commit.
    pub fn set_part(&mut self, part: impl Into<String>, value: impl Into<Value>) {
        self.parts.insert(part.into(), value.into());
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionRef> {
        self.resources.session.as_ref()
    }

    /// Id of the attached session resource, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.resources.session.as_ref().map(|s| s.session_id())
    }

    /// Attach or replace the session resource.
    pub fn set_session(&mut self, session: SessionRef) {
        self.resources.session = Some(session);
    }

    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.resources.retry_attempts
    }

    pub fn set_retry_attempts(&mut self, attempts: u32) {
        self.resources.retry_attempts = attempts;
    }

    #[must_use]
    pub fn is_flag_set(&self, flag: RoutingFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: RoutingFlag) {
        self.flags.insert(flag);
    }

    pub fn unset_flag(&mut self, flag: RoutingFlag) {
        self.flags.remove(flag);
    }

    #[must_use]
    pub fn flags(&self) -> RoutingFlags {
        self.flags
    }

    /// Whether the message carries the priority part.
    #[must_use]
    pub fn is_priority(&self) -> bool {
        self.has_part(parts::PRIORITY_PROCESSING)
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Freeze subject and command. Idempotent.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Change the subject.
    ///
    /// # Errors
    ///
    /// `BusError::MessageCommitted` once the message was committed.
    pub fn set_subject(&mut self, subject: impl Into<String>) -> Result<(), BusError> {
        if self.committed {
            return Err(BusError::MessageCommitted);
        }
        self.subject = subject.into();
        Ok(())
    }

    /// Change the command.
    ///
    /// # Errors
    ///
    /// `BusError::MessageCommitted` once the message was committed.
    pub fn set_command(&mut self, command: impl Into<String>) -> Result<(), BusError> {
        if self.committed {
            return Err(BusError::MessageCommitted);
        }
        self.command = Some(command.into());
        Ok(())
    }
}

/// Commands understood on the `ServerBus` control subject, plus the ones the
/// bus emits towards `ClientBus`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// Refresh liveness of the sender's queue.
    Heartbeat,
    /// Register one or many subjects as remotely subscribed.
    RemoteSubscribe,
    /// Deregister a remotely subscribed subject.
    RemoteUnsubscribe,
    /// Handshake finished; the queue becomes active.
    FinishStateSync,
    /// Stop and close the sender's queue.
    Disconnect,
    /// (Re)provision a queue for the sender's session.
    ConnectToQueue,
    /// Long-poll availability and poll interval, sent outward.
    CapabilitiesNotice,
    /// A send was vetoed by a global listener.
    MessageNotDelivered,
    /// Anything else; handled by the explicit fallback.
    Unknown(String),
}

impl ControlCommand {
    /// Wire name of the command.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "Heartbeat",
            Self::RemoteSubscribe => "RemoteSubscribe",
            Self::RemoteUnsubscribe => "RemoteUnsubscribe",
            Self::FinishStateSync => "FinishStateSync",
            Self::Disconnect => "Disconnect",
            Self::ConnectToQueue => "ConnectToQueue",
            Self::CapabilitiesNotice => "CapabilitiesNotice",
            Self::MessageNotDelivered => "MessageNotDelivered",
            Self::Unknown(other) => other,
        }
    }

    /// Parse the command of `message`; a missing command is `Unknown("")`.
    #[must_use]
    pub fn of(message: &Message) -> Self {
        message
            .command()
            .map_or_else(|| Self::Unknown(String::new()), Self::parse)
    }

    /// Parse a wire name. Never fails; unrecognised names become `Unknown`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "Heartbeat" => Self::Heartbeat,
            "RemoteSubscribe" => Self::RemoteSubscribe,
            "RemoteUnsubscribe" => Self::RemoteUnsubscribe,
            "FinishStateSync" => Self::FinishStateSync,
            "Disconnect" => Self::Disconnect,
            "ConnectToQueue" => Self::ConnectToQueue,
            "CapabilitiesNotice" => Self::CapabilitiesNotice,
            "MessageNotDelivered" => Self::MessageNotDelivered,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl FromStr for ControlCommand {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags advertised in a `CapabilitiesNotice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    LongPollAvailable,
    NoLongPollAvailable,
}

impl Capabilities {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongPollAvailable => "LongPollAvailable",
            Self::NoLongPollAvailable => "NoLongPollAvailable",
        }
    }
}
