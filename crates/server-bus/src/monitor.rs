//! Observability boundary.
//!
//! A monitor is told about queue attach/detach, traffic crossing the remote
//! boundary and every subscription change. It never influences routing.
//! All methods default to no-ops so implementors pick what they need.

use crate::bus::ServerBus;
use crate::message::Message;
use crate::session::SessionId;

pub trait BusMonitor: Send + Sync {
    /// Called once when the monitor is installed, before back-filling.
    fn attach(&self, _bus: &ServerBus) {}

    fn notify_queue_attached(&self, _session_id: &SessionId) {}

    fn notify_queue_detached(&self, _session_id: &SessionId) {}

    /// A message sent by a remote peer entered the bus.
    fn notify_incoming_from_remote(&self, _session_id: Option<&SessionId>, _message: &Message) {}

    /// A message was handed to a remote queue.
    fn notify_outgoing_to_remote(&self, _session_id: &SessionId, _message: &Message) {}

    /// A message was published by a local producer.
    fn notify_in_bus_message(&self, _message: &Message) {}

    /// A local (`session_id == None`) or remote subscription was added.
    fn notify_new_subscription(&self, _subject: &str, _session_id: Option<&SessionId>) {}

    fn notify_unsubscription(&self, _subject: &str, _session_id: Option<&SessionId>) {}
}
