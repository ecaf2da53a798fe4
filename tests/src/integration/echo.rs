//! # Echo Round Trips
//!
//! The runtime's `Echo` service answers each peer on its own queue:
//!
//! 1. Peer connects and finishes the handshake
//! 2. Peer sends `Echo` with a `Text` part
//! 3. The reply lands in that peer's queue only

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bus_runtime::{BusRuntime, RuntimeConfig, ECHO_SUBJECT, TEXT};
    use courier_telemetry::BusMetrics;
    use server_bus::{parts, ControlCommand};

    use crate::fixtures::{settle, test_config, Peer};

    fn runtime() -> BusRuntime {
        let config = RuntimeConfig {
            bus: test_config(),
            stats_interval: None,
            ..RuntimeConfig::default()
        };
        let mut runtime = BusRuntime::new(config, Arc::new(BusMetrics::standalone().unwrap())).unwrap();
        runtime.start().unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_reply_reaches_only_the_sender() {
        let runtime = runtime();
        let bus = runtime.bus();
        let alice = Peer::new("alice");
        let bob = Peer::new("bob");
        alice.connect_active(bus).await.unwrap();
        bob.connect_active(bus).await.unwrap();

        bus.deliver_from_remote(alice.message(ECHO_SUBJECT).with(TEXT, "hello"))
            .unwrap();
        settle().await;

        let replies = alice.drain(bus);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].get::<String>(TEXT).as_deref(), Some("hello!"));
        assert!(bob.drain(bus).is_empty());
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_reply_to_subject_is_honoured() {
        let runtime = runtime();
        let bus = runtime.bus();
        let alice = Peer::new("alice");
        alice.connect_active(bus).await.unwrap();

        bus.deliver_from_remote(
            alice
                .message(ECHO_SUBJECT)
                .with(TEXT, "hi")
                .with(parts::REPLY_TO, "EchoReply"),
        )
        .unwrap();
        settle().await;

        let replies = alice.drain(bus);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].subject(), "EchoReply");
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_handshake_advertises_echo() {
        let runtime = runtime();
        let bus = runtime.bus();
        let alice = Peer::new("alice");
        alice.connect(bus).await.unwrap();

        let handshake = alice.drain(bus);
        let advertised: Vec<String> = handshake
            .iter()
            .find(|m| ControlCommand::of(m) == ControlCommand::RemoteSubscribe)
            .and_then(|m| m.get(parts::SUBJECTS_LIST))
            .unwrap();
        assert!(advertised.contains(&ECHO_SUBJECT.to_string()));
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_requests_before_state_sync_are_answered_after() {
        let runtime = runtime();
        let bus = runtime.bus();
        let alice = Peer::new("alice");
        alice.connect(bus).await.unwrap();
        alice.drain(bus);

        bus.deliver_from_remote(alice.message(ECHO_SUBJECT).with(TEXT, "early"))
            .unwrap();
        settle().await;
        assert!(alice.drain(bus).is_empty());

        bus.deliver_from_remote(alice.control(ControlCommand::FinishStateSync))
            .unwrap();
        settle().await;

        let replies = alice.drain(bus);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].get::<String>(TEXT).as_deref(), Some("early!"));
        runtime.shutdown();
    }
}
