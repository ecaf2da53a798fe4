//! Prometheus-backed bus monitor and failure counter.

use crate::metrics::{direction, scope, BusMetrics};
use parking_lot::Mutex;
use server_bus::{
    BusError, BusMonitor, DeliveryFailure, FailureHandler, Message, ServerBus, SessionId,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
struct Tracked {
    queues: HashSet<SessionId>,
    local: HashSet<String>,
    remote: HashSet<(String, SessionId)>,
}

/// Feeds [`BusMetrics`] from bus notifications.
///
/// Gauges are derived from the sets of queues and subscriptions the monitor
/// has seen, so a repeated attach notification for a reconnecting session
/// or a second handler on a subject does not inflate them.
pub struct PrometheusMonitor {
    metrics: Arc<BusMetrics>,
    tracked: Mutex<Tracked>,
}

impl PrometheusMonitor {
    #[must_use]
    pub fn new(metrics: Arc<BusMetrics>) -> Self {
        Self {
            metrics,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    fn sync_gauges(&self, tracked: &Tracked) {
        let to_i64 = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        self.metrics.queues_connected.set(to_i64(tracked.queues.len()));
        self.metrics
            .subscriptions
            .with_label_values(&[scope::LOCAL])
            .set(to_i64(tracked.local.len()));
        self.metrics
            .subscriptions
            .with_label_values(&[scope::REMOTE])
            .set(to_i64(tracked.remote.len()));
    }

    fn count_change(&self, change: &str, session_id: Option<&SessionId>) {
        let scope = if session_id.is_some() {
            scope::REMOTE
        } else {
            scope::LOCAL
        };
        self.metrics
            .subscription_changes
            .with_label_values(&[change, scope])
            .inc();
    }
}

impl std::fmt::Debug for PrometheusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMonitor")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl BusMonitor for PrometheusMonitor {
    fn attach(&self, bus: &ServerBus) {
        // Back-fill follows; start from a clean slate.
        let mut tracked = self.tracked.lock();
        *tracked = Tracked::default();
        self.sync_gauges(&tracked);
        info!(queues = bus.queue_count(), "Prometheus monitor attached");
    }

    fn notify_queue_attached(&self, session_id: &SessionId) {
        self.metrics.queues_attached.inc();
        let mut tracked = self.tracked.lock();
        tracked.queues.insert(session_id.clone());
        self.sync_gauges(&tracked);
    }

    fn notify_queue_detached(&self, session_id: &SessionId) {
        self.metrics.queues_detached.inc();
        let mut tracked = self.tracked.lock();
        tracked.queues.remove(session_id);
        self.sync_gauges(&tracked);
    }

    fn notify_incoming_from_remote(&self, _session_id: Option<&SessionId>, _message: &Message) {
        self.metrics
            .messages
            .with_label_values(&[direction::INCOMING])
            .inc();
    }

    fn notify_outgoing_to_remote(&self, _session_id: &SessionId, _message: &Message) {
        self.metrics
            .messages
            .with_label_values(&[direction::OUTGOING])
            .inc();
    }

    fn notify_in_bus_message(&self, _message: &Message) {
        self.metrics
            .messages
            .with_label_values(&[direction::IN_BUS])
            .inc();
    }

    fn notify_new_subscription(&self, subject: &str, session_id: Option<&SessionId>) {
        self.count_change("added", session_id);
        let mut tracked = self.tracked.lock();
        match session_id {
            Some(id) => tracked.remote.insert((subject.to_string(), id.clone())),
            None => tracked.local.insert(subject.to_string()),
        };
        self.sync_gauges(&tracked);
    }

    fn notify_unsubscription(&self, subject: &str, session_id: Option<&SessionId>) {
        self.count_change("removed", session_id);
        let mut tracked = self.tracked.lock();
        match session_id {
            Some(id) => tracked.remote.remove(&(subject.to_string(), id.clone())),
            None => tracked.local.remove(subject),
        };
        self.sync_gauges(&tracked);
    }
}

/// Counts failures by error kind, then hands them to `inner`.
pub struct CountingFailureHandler<H> {
    metrics: Arc<BusMetrics>,
    inner: H,
}

impl<H: FailureHandler> CountingFailureHandler<H> {
    pub fn new(metrics: Arc<BusMetrics>, inner: H) -> Self {
        Self { metrics, inner }
    }
}

impl<H: FailureHandler> FailureHandler for CountingFailureHandler<H> {
    fn on_delivery_failure(&self, bus: &ServerBus, failure: DeliveryFailure) {
        let kind = failure.error.as_ref().map_or("none", BusError::kind);
        self.metrics
            .delivery_failures
            .with_label_values(&[kind])
            .inc();
        self.inner.on_delivery_failure(bus, failure);
    }
}
