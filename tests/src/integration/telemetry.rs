//! # Telemetry
//!
//! The Prometheus monitor tracks a live bus: queue gauges follow connects and
//! disconnects, traffic is counted per direction and failures per kind.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use courier_telemetry::metrics::{direction, scope};
    use courier_telemetry::{BusMetrics, CountingFailureHandler, PrometheusMonitor};
    use server_bus::{
        BusConfig, DeliveryFailure, FailureHandler, FailureLog, Message, RetryPolicy, ServerBus,
    };

    use crate::fixtures::{settle, test_config, Peer};

    fn monitored_bus(config: BusConfig) -> (ServerBus, Arc<BusMetrics>, Arc<FailureLog>) {
        let bus = ServerBus::new(config).unwrap();
        let metrics = Arc::new(BusMetrics::standalone().unwrap());
        let log = Arc::new(FailureLog::new());
        let recorder = Arc::clone(&log);
        bus.set_failure_handler(Arc::new(CountingFailureHandler::new(
            Arc::clone(&metrics),
            move |bus: &ServerBus, failure: DeliveryFailure| {
                recorder.on_delivery_failure(bus, failure);
            },
        )));
        bus.attach_monitor(Arc::new(PrometheusMonitor::new(Arc::clone(&metrics))));
        (bus, metrics, log)
    }

    #[tokio::test]
    async fn test_queue_gauge_follows_sessions() {
        let (bus, metrics, _log) = monitored_bus(test_config());
        let alice = Peer::new("alice");
        let bob = Peer::new("bob");

        alice.connect_active(&bus).await.unwrap();
        bob.connect_active(&bus).await.unwrap();
        assert_eq!(metrics.queues_connected.get(), 2);
        assert_eq!(metrics.subscription_count(scope::REMOTE), 2);

        alice.disconnect(&bus).await.unwrap();
        assert_eq!(metrics.queues_connected.get(), 1);
        assert_eq!(metrics.queues_detached.get(), 1);
        assert_eq!(metrics.subscription_count(scope::REMOTE), 1);
        bus.stop();
    }

    #[tokio::test]
    async fn test_traffic_counted_by_direction() {
        let (bus, metrics, _log) = monitored_bus(test_config());
        bus.subscribe("Echo", |bus, message| match message.session() {
            Some(_) => bus.send(Message::conversation(message)),
            None => Ok(()),
        })
        .unwrap();
        let peer = Peer::new("p1");
        peer.connect_active(&bus).await.unwrap();
        let incoming_before = metrics.message_count(direction::INCOMING);
        let outgoing_before = metrics.message_count(direction::OUTGOING);

        bus.deliver_from_remote(peer.message("Echo")).unwrap();
        bus.send(Message::new("Echo")).unwrap();
        settle().await;

        assert_eq!(metrics.message_count(direction::INCOMING), incoming_before + 1);
        // Only the peer gets a reply.
        assert_eq!(metrics.message_count(direction::OUTGOING), outgoing_before + 1);
        assert!(metrics.message_count(direction::IN_BUS) >= 1);
        bus.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_exported() {
        let config = BusConfig {
            retry: RetryPolicy::fail_fast(),
            ..test_config()
        };
        let (bus, metrics, log) = monitored_bus(config);

        bus.send(Message::new("Nowhere")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(log.len(), 1);
        let text = metrics.encode().unwrap();
        assert!(text.contains(
            "courier_bus_delivery_failures_total{kind=\"no_subscribers\"} 1"
        ));
        bus.stop();
    }
}
