//! # Housekeeping
//!
//! Queues with no activity inside the stale window are evicted on the next
//! housekeeping pass: withdrawn from every fan-out, closed, their session
//! ended and queue-closed listeners told. Active peers are untouched.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use server_bus::{BusConfig, ListenerAction, Message, QueueClosedEvent, QueueState};

    use crate::fixtures::{recording_bus, settle, Peer};

    fn eviction_config() -> BusConfig {
        BusConfig {
            stale_window: Duration::from_secs(5),
            housekeeping_interval: Duration::from_secs(1),
            ..BusConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_evicted_active_peer_kept() {
        let (bus, log) = recording_bus(eviction_config());
        let closed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&closed);
        bus.add_queue_closed_listener(Arc::new(move |event: &QueueClosedEvent| {
            sink.lock().push(event.session_id.to_string());
            ListenerAction::Keep
        }));

        let silent = Peer::new("silent");
        let chatty = Peer::new("chatty");
        let silent_queue = silent.connect_active(&bus).await.unwrap();
        chatty.connect_active(&bus).await.unwrap();
        silent.subscribe(&bus, "News").await.unwrap();
        chatty.subscribe(&bus, "News").await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            chatty.heartbeat(&bus).unwrap();
        }
        settle().await;

        assert!(bus.queue(&silent.id()).is_none());
        assert_eq!(silent_queue.state(), QueueState::Closed);
        assert!(silent.session.is_ended());
        assert!(!bus.has_remote_subscription(&silent.id(), "News"));
        assert_eq!(*closed.lock(), vec!["silent".to_string()]);

        assert!(bus.queue(&chatty.id()).is_some());
        assert!(!chatty.session.is_ended());
        assert!(bus.has_remote_subscription(&chatty.id(), "News"));

        bus.send(Message::new("News")).unwrap();
        settle().await;
        assert_eq!(chatty.drain(&bus).len(), 1);
        assert!(log.is_empty());
        bus.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_counts_as_activity() {
        let (bus, _log) = recording_bus(eviction_config());
        let peer = Peer::new("poller");
        peer.connect_active(&bus).await.unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            peer.drain(&bus);
        }

        assert!(bus.queue(&peer.id()).is_some());
        assert_eq!(bus.stats().evicted.load(std::sync::atomic::Ordering::Relaxed), 0);
        bus.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_peer_can_reconnect() {
        let (bus, _log) = recording_bus(eviction_config());
        let peer = Peer::new("flaky");
        peer.connect_active(&bus).await.unwrap();

        tokio::time::sleep(Duration::from_secs(7)).await;
        settle().await;
        assert!(bus.queue(&peer.id()).is_none());

        let again = Peer::new("flaky");
        again.connect_active(&bus).await.unwrap();
        assert_eq!(
            bus.queue(&again.id()).map(|q| q.state()),
            Some(QueueState::Active)
        );
        bus.stop();
    }
}
