//! Peer harness: drives the control subject the way a transport would.

use std::sync::Arc;
use std::time::Duration;

use server_bus::{
    parts, BusConfig, BusError, ControlCommand, FailureHandler, FailureLog, LocalSession, Message,
    MessageQueue, QueueSession, ServerBus, SessionId, SessionRef, SERVER_BUS_SUBJECT,
};

/// Default config with the housekeeper effectively off.
pub fn test_config() -> BusConfig {
    BusConfig {
        housekeeping_interval: Duration::from_secs(3600),
        ..BusConfig::default()
    }
}

/// A bus whose failures are recorded instead of logged.
pub fn recording_bus(config: BusConfig) -> (ServerBus, Arc<FailureLog>) {
    let bus = ServerBus::new(config).unwrap();
    let log = Arc::new(FailureLog::new());
    bus.set_failure_handler(Arc::clone(&log) as Arc<dyn FailureHandler>);
    (bus, log)
}

/// Let queue workers drain their inboxes.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// A remote peer with its session.
pub struct Peer {
    pub session: Arc<LocalSession>,
}

impl Peer {
    pub fn new(id: &str) -> Self {
        Self {
            session: LocalSession::new(id),
        }
    }

    pub fn id(&self) -> SessionId {
        self.session.session_id().clone()
    }

    fn session_ref(&self) -> SessionRef {
        Arc::clone(&self.session) as SessionRef
    }

    /// Control message on the `ServerBus` subject from this peer.
    pub fn control(&self, command: ControlCommand) -> Message {
        Message::control(SERVER_BUS_SUBJECT, command).with_session(self.session_ref())
    }

    /// Application message from this peer.
    pub fn message(&self, subject: &str) -> Message {
        Message::new(subject).with_session(self.session_ref())
    }

    /// `ConnectToQueue`; the queue stays provisioned.
    pub async fn connect(&self, bus: &ServerBus) -> Result<(), BusError> {
        bus.deliver_from_remote(self.control(ControlCommand::ConnectToQueue))?;
        settle().await;
        Ok(())
    }

    /// Connect, finish the handshake and consume the handshake traffic.
    pub async fn connect_active(&self, bus: &ServerBus) -> Result<Arc<MessageQueue>, BusError> {
        self.connect(bus).await?;
        bus.deliver_from_remote(self.control(ControlCommand::FinishStateSync))?;
        settle().await;
        let queue = bus.queue(&self.id()).ok_or_else(|| BusError::QueueUnavailable {
            session_id: self.id(),
        })?;
        queue.poll(usize::MAX);
        Ok(queue)
    }

    pub async fn subscribe(&self, bus: &ServerBus, subject: &str) -> Result<(), BusError> {
        bus.deliver_from_remote(
            self.control(ControlCommand::RemoteSubscribe)
                .with(parts::SUBJECT, subject),
        )?;
        settle().await;
        Ok(())
    }

    pub fn heartbeat(&self, bus: &ServerBus) -> Result<(), BusError> {
        bus.deliver_from_remote(self.control(ControlCommand::Heartbeat))
    }

    pub async fn disconnect(&self, bus: &ServerBus) -> Result<(), BusError> {
        bus.deliver_from_remote(self.control(ControlCommand::Disconnect))?;
        settle().await;
        Ok(())
    }

    /// Everything buffered for this peer.
    pub fn drain(&self, bus: &ServerBus) -> Vec<Message> {
        bus.queue(&self.id())
            .map(|queue| queue.poll(usize::MAX))
            .unwrap_or_default()
    }
}
