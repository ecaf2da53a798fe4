//! Built-in services.

use server_bus::{parts, BusError, Message, ServerBus};
use tracing::debug;

/// Subject of the echo service.
pub const ECHO_SUBJECT: &str = "Echo";

/// Message part holding the text to echo.
pub const TEXT: &str = "Text";

/// Reply to the sender with the received text and a trailing `!`.
///
/// Messages with neither a session nor a `ReplyTo` part have nowhere to go
/// and are dropped.
///
/// # Errors
///
/// Whatever sending the reply returns.
pub fn echo(bus: &ServerBus, message: &Message) -> Result<(), BusError> {
    if message.session().is_none() && !message.has_part(parts::REPLY_TO) {
        debug!(message_id = %message.id(), "Echo request without a reply target");
        return Ok(());
    }

    let text = message.get::<String>(TEXT).unwrap_or_default();
    debug!(message_id = %message.id(), session_id = ?message.session_id(), "Echoing");
    bus.send(Message::conversation(message).with(TEXT, format!("{text}!")))
}
