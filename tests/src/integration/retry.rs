//! # Retry-or-Fail
//!
//! Undeliverable sends are retried at a fixed interval a fixed number of
//! times, then reported exactly once. Targets that show up in time get the
//! message.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use server_bus::{parts, BusError, ControlCommand, Message};

    use crate::fixtures::{recording_bus, settle, test_config, Peer};

    #[tokio::test(start_paused = true)]
    async fn test_unrouteable_send_fails_once_after_bounded_retries() {
        let (bus, log) = recording_bus(test_config());

        bus.send(Message::new("Nowhere")).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        let errors = log.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            BusError::NoSubscribersToDeliver { subject } if subject == "Nowhere"
        ));
        assert_eq!(bus.stats().retried.load(Ordering::Relaxed), 3);
        assert_eq!(bus.stats().failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_directed_send_waits_for_late_peer() {
        let (bus, log) = recording_bus(test_config());

        bus.send(Message::new("Direct").with(parts::SESSION_ID, "late"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let peer = Peer::new("late");
        peer.connect(&bus).await.unwrap();
        peer.drain(&bus);

        // Next retry finds a provisioned queue and parks the message.
        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;
        assert!(peer.drain(&bus).is_empty());

        bus.deliver_from_remote(peer.control(ControlCommand::FinishStateSync))
            .unwrap();
        settle().await;

        let delivered = peer.drain(&bus);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].subject(), "Direct");
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_directed_send_to_unknown_session_reported() {
        let (bus, log) = recording_bus(test_config());

        bus.send(Message::new("Direct").with(parts::SESSION_ID, "ghost"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        let errors = log.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            BusError::QueueUnavailable { session_id } if session_id.as_str() == "ghost"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_message_retried_until_service_registers() {
        let (bus, log) = recording_bus(test_config());
        let peer = Peer::new("p1");
        peer.connect_active(&bus).await.unwrap();

        bus.deliver_from_remote(peer.message("Lazy").with("n", 7))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        bus.subscribe("Lazy", |bus, message| {
            let n = message.get::<i64>("n").unwrap_or(0);
            bus.send(Message::conversation(message).with("n", n + 1))
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;

        // The subscription is also advertised to the peer on ClientBus.
        let replies: Vec<Message> = peer
            .drain(&bus)
            .into_iter()
            .filter(|m| m.subject() == "Lazy")
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].get::<i64>("n"), Some(8));
        assert!(log.is_empty());
    }
}
