//! # Fan-out
//!
//! One send reaches every local handler and every remotely subscribed queue
//! exactly once; a failing or departed target does not affect the others.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use server_bus::{BusError, Message, ServerBus};

    use crate::fixtures::{recording_bus, settle, test_config, Peer};

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn(&ServerBus, &Message) -> Result<(), BusError> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_and_remote_targets_each_get_one_copy() {
        let (bus, log) = recording_bus(test_config());
        let local = Arc::new(AtomicUsize::new(0));
        bus.subscribe("News", counting(&local)).unwrap();

        let peers: Vec<Peer> = ["p1", "p2", "p3"].into_iter().map(Peer::new).collect();
        for peer in &peers {
            peer.connect_active(&bus).await.unwrap();
            peer.subscribe(&bus, "News").await.unwrap();
        }
        assert_eq!(bus.receiver_count("News"), 4);

        bus.send(Message::new("News").with("headline", "rust")).unwrap();
        settle().await;

        assert_eq!(local.load(Ordering::SeqCst), 1);
        for peer in &peers {
            let got = peer.drain(&bus);
            assert_eq!(got.len(), 1, "peer {}", peer.id());
            assert_eq!(got[0].subject(), "News");
        }
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_peer_leaves_fan_out() {
        let (bus, log) = recording_bus(test_config());
        let alice = Peer::new("alice");
        let bob = Peer::new("bob");
        for peer in [&alice, &bob] {
            peer.connect_active(&bus).await.unwrap();
            peer.subscribe(&bus, "News").await.unwrap();
        }

        alice.disconnect(&bus).await.unwrap();
        assert!(bus.queue(&alice.id()).is_none());
        assert!(!alice.session.is_ended());

        bus.send(Message::new("News")).unwrap();
        settle().await;

        assert_eq!(bob.drain(&bus).len(), 1);
        assert!(log.is_empty());

        bob.disconnect(&bus).await.unwrap();
        assert!(!bus.has_remote_subscriptions("News"));
        assert!(!bus.is_subscribed("News"));
    }

    #[tokio::test]
    async fn test_failing_handler_isolated_from_peers() {
        let (bus, log) = recording_bus(test_config());
        let healthy = Arc::new(AtomicUsize::new(0));
        bus.subscribe("News", |_, _| {
            Err(BusError::UnknownSubject {
                subject: "broken".to_string(),
            })
        })
        .unwrap();
        bus.subscribe("News", counting(&healthy)).unwrap();

        let peer = Peer::new("p1");
        peer.connect_active(&bus).await.unwrap();
        peer.subscribe(&bus, "News").await.unwrap();

        bus.send(Message::new("News")).unwrap();
        settle().await;

        assert_eq!(healthy.load(Ordering::SeqCst), 1);
        assert_eq!(peer.drain(&bus).len(), 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_messages_reach_other_peers() {
        let (bus, _log) = recording_bus(test_config());
        let alice = Peer::new("alice");
        let bob = Peer::new("bob");
        alice.connect_active(&bus).await.unwrap();
        bob.connect_active(&bus).await.unwrap();
        bob.subscribe(&bus, "Chat").await.unwrap();

        for i in 0..5 {
            bus.deliver_from_remote(alice.message("Chat").with("seq", i))
                .unwrap();
        }
        settle().await;

        let seqs: Vec<i64> = bob
            .drain(&bus)
            .iter()
            .filter_map(|m| m.get::<i64>("seq"))
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }
}
