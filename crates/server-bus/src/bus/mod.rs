//! # Server Bus
//!
//! The routing authority of the process. One `ServerBus` owns:
//!
//! | Registry | Key | Lock |
//! |----------|-----|------|
//! | Delivery plans | subject | `subscriptions` (RwLock) |
//! | Remote fan-outs | subject | `remote_subscriptions` (RwLock) |
//! | Queues + sessions | session id | `queues` (RwLock) |
//! | Reserved subjects | subject | `reserved` (RwLock) |
//!
//! Lock order is `queues → subscriptions → remote_subscriptions → reserved`,
//! with a queue's own lock innermost. Registry locks are released before handlers,
//! listeners or the monitor are called.
//!
//! ## Delivery
//!
//! ```text
//! send ──┬─ session resource / SessionID part ──→ directed ──→ queue inbox
//!        └─ otherwise ──→ send_global ──→ DeliveryPlan ──┬─→ local handlers
//!                                                        └─→ RemoteFanout ──→ queue inboxes
//! queue inbox ──(worker task)──→ offer | defer | report
//! missing plan / queue ──→ retry after interval ──→ … ──→ FailureHandler
//! ```
//!
//! Every queue has an unbounded inbox drained by one worker task, so
//! producers never block on queue contention and one producer's messages
//! reach a queue in call order.

mod control;
mod housekeeping;
mod routing;
mod subscriptions;


use crate::config::{BusConfig, ConfigError};
use crate::failure::{FailureHandler, LoggingFailureHandler};
use crate::listeners::{
    GlobalListeners, ListenerList, MessageListener, QueueClosedListener, SubscribeListener,
    UnsubscribeListener,
};
use crate::message::Message;
use crate::monitor::BusMonitor;
use crate::plan::DeliveryPlan;
use crate::queue::MessageQueue;
use crate::remote::RemoteFanout;
use crate::session::{SessionId, SessionRef};
use crate::SERVER_BUS_SUBJECT;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Delivery counters.
#[derive(Debug, Default)]
pub struct BusStats {
    /// Messages accepted into a queue buffer.
    pub sent: AtomicU64,
    /// Messages parked in a deferred buffer.
    pub deferred: AtomicU64,
    /// Retries scheduled.
    pub retried: AtomicU64,
    /// Failures handed to the failure handler.
    pub failed: AtomicU64,
    /// Queues evicted by the housekeeper.
    pub evicted: AtomicU64,
}

/// A registered queue with its session and inbox.
#[derive(Clone)]
pub(crate) struct QueueEntry {
    pub(crate) queue: Arc<MessageQueue>,
    pub(crate) session: SessionRef,
    pub(crate) inbox: mpsc::UnboundedSender<Message>,
}

pub(crate) struct BusInner {
    pub(crate) config: BusConfig,
    pub(crate) subscriptions: RwLock<HashMap<String, Arc<DeliveryPlan>>>,
    pub(crate) remote_subscriptions: RwLock<HashMap<String, Arc<RemoteFanout>>>,
    pub(crate) queues: RwLock<HashMap<SessionId, QueueEntry>>,
    pub(crate) reserved: RwLock<HashSet<String>>,
    pub(crate) subscribe_listeners: ListenerList<dyn SubscribeListener>,
    pub(crate) unsubscribe_listeners: ListenerList<dyn UnsubscribeListener>,
    pub(crate) queue_closed_listeners: ListenerList<dyn QueueClosedListener>,
    pub(crate) global_listeners: GlobalListeners,
    pub(crate) monitor: RwLock<Option<Arc<dyn BusMonitor>>>,
    pub(crate) failure_handler: RwLock<Arc<dyn FailureHandler>>,
    pub(crate) stopped: AtomicBool,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) runtime: Handle,
    pub(crate) stats: BusStats,
}

/// Process-wide publish/subscribe router.
///
/// Cheap to clone; all clones share one set of registries.
#[derive(Clone)]
pub struct ServerBus {
    pub(crate) inner: Arc<BusInner>,
}

impl std::fmt::Debug for ServerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.inner.queues.read().len();
        let subjects = self.inner.subscriptions.read().len();
        f.debug_struct("ServerBus")
            .field("subjects", &subjects)
            .field("queues", &queues)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl ServerBus {
    /// Build a bus on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// The [`ConfigError`] of an invalid configuration.
    ///
    /// # Panics
    ///
    /// Outside a Tokio runtime.
    pub fn new(config: BusConfig) -> Result<Self, ConfigError> {
        Self::with_runtime(config, Handle::current())
    }

    /// Build a bus whose worker, retry and housekeeping tasks run on `runtime`.
    ///
    /// # Errors
    ///
    /// The [`ConfigError`] of an invalid configuration; nothing is spawned.
    pub fn with_runtime(config: BusConfig, runtime: Handle) -> Result<Self, ConfigError> {
        config.validate()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(BusInner {
            config,
            subscriptions: RwLock::new(HashMap::new()),
            remote_subscriptions: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            reserved: RwLock::new(HashSet::new()),
            subscribe_listeners: ListenerList::default(),
            unsubscribe_listeners: ListenerList::default(),
            queue_closed_listeners: ListenerList::default(),
            global_listeners: GlobalListeners::default(),
            monitor: RwLock::new(None),
            failure_handler: RwLock::new(Arc::new(LoggingFailureHandler)),
            stopped: AtomicBool::new(false),
            shutdown,
            runtime,
            stats: BusStats::default(),
        });

        let bus = Self { inner };
        bus.install_control_handler();
        bus.install_remote_advertisers();
        housekeeping::spawn_housekeeper(&bus.inner, shutdown_rx);

        info!(
            queue_size = bus.inner.config.queue_size,
            long_polling = bus.inner.config.long_polling,
            "Server bus started"
        );
        Ok(bus)
    }

    pub(crate) fn from_inner(inner: Arc<BusInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Lock every subject that currently has a local handler against
    /// (re)subscription and removal.
    pub fn finish_init(&self) {
        let subscriptions = self.inner.subscriptions.read();
        let mut reserved = self.inner.reserved.write();
        reserved.extend(
            subscriptions
                .iter()
                .filter(|(_, plan)| plan.local_count() > 0)
                .map(|(subject, _)| subject.clone()),
        );
        info!(reserved = reserved.len(), "Bus initialized; reserved subjects locked");
    }

    /// Whether `subject` is locked.
    #[must_use]
    pub fn is_reserved(&self, subject: &str) -> bool {
        self.inner.reserved.read().contains(subject)
    }

    /// Close every queue and stop the housekeeper. Terminal and idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let entries: Vec<QueueEntry> = self
            .inner
            .queues
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            entry.queue.stop_queue();
        }

        let _ = self.inner.shutdown.send(true);
        info!(closed_queues = entries.len(), "Server bus stopped");
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Whether a delivery plan exists for `subject`.
    #[must_use]
    pub fn is_subscribed(&self, subject: &str) -> bool {
        self.inner.subscriptions.read().contains_key(subject)
    }

    /// Local handlers plus remote queues bound to `subject`.
    #[must_use]
    pub fn receiver_count(&self, subject: &str) -> usize {
        self.inner
            .subscriptions
            .read()
            .get(subject)
            .map_or(0, |plan| plan.total_receivers())
    }

    #[must_use]
    pub fn has_remote_subscriptions(&self, subject: &str) -> bool {
        self.inner.remote_subscriptions.read().contains_key(subject)
    }

    /// Whether the queue of `session_id` is a fan-out target for `subject`.
    #[must_use]
    pub fn has_remote_subscription(&self, session_id: &SessionId, subject: &str) -> bool {
        self.inner
            .remote_subscriptions
            .read()
            .get(subject)
            .is_some_and(|fanout| fanout.contains(session_id))
    }

    #[must_use]
    pub fn queue(&self, session_id: &SessionId) -> Option<Arc<MessageQueue>> {
        self.inner
            .queues
            .read()
            .get(session_id)
            .map(|entry| Arc::clone(&entry.queue))
    }

    /// Reverse lookup from session id to session.
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<SessionRef> {
        self.inner
            .queues
            .read()
            .get(session_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.inner.queues.read().len()
    }

    #[must_use]
    pub fn stats(&self) -> &BusStats {
        &self.inner.stats
    }

    // =========================================================================
    // HOOKS
    // =========================================================================

    pub fn add_subscribe_listener(&self, listener: Arc<dyn SubscribeListener>) {
        self.inner.subscribe_listeners.add(listener);
    }

    pub fn add_unsubscribe_listener(&self, listener: Arc<dyn UnsubscribeListener>) {
        self.inner.unsubscribe_listeners.add(listener);
    }

    pub fn add_queue_closed_listener(&self, listener: Arc<dyn QueueClosedListener>) {
        self.inner.queue_closed_listeners.add(listener);
    }

    /// Install an observer that may veto any send.
    pub fn add_global_listener(&self, listener: Arc<dyn MessageListener>) {
        self.inner.global_listeners.add(listener);
    }

    pub fn set_failure_handler(&self, handler: Arc<dyn FailureHandler>) {
        *self.inner.failure_handler.write() = handler;
    }

    /// Install the monitor and back-fill it with current queues and
    /// subscriptions. Re-attaching the same monitor is a no-op; replacing a
    /// different one logs a warning.
    pub fn attach_monitor(&self, monitor: Arc<dyn BusMonitor>) {
        {
            let mut slot = self.inner.monitor.write();
            if let Some(existing) = slot.as_ref() {
                if std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&monitor)) {
                    return;
                }
                warn!("Replacing existing bus monitor");
            }
            *slot = Some(Arc::clone(&monitor));
        }

        monitor.attach(self);

        let queue_ids: Vec<SessionId> = self.inner.queues.read().keys().cloned().collect();
        for session_id in &queue_ids {
            monitor.notify_queue_attached(session_id);
        }

        let local_subjects: Vec<String> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|(_, plan)| plan.local_count() > 0)
            .map(|(subject, _)| subject.clone())
            .collect();
        for subject in &local_subjects {
            monitor.notify_new_subscription(subject, None);
        }

        let remote: Vec<(String, Vec<SessionId>)> = self
            .inner
            .remote_subscriptions
            .read()
            .iter()
            .map(|(subject, fanout)| (subject.clone(), fanout.targets()))
            .collect();
        for (subject, targets) in &remote {
            for session_id in targets {
                monitor.notify_new_subscription(subject, Some(session_id));
            }
        }
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    pub(crate) fn with_monitor(&self, notify: impl FnOnce(&dyn BusMonitor)) {
        let monitor = self.inner.monitor.read().clone();
        if let Some(monitor) = monitor {
            notify(monitor.as_ref());
        }
    }

    pub(crate) fn entry(&self, session_id: &SessionId) -> Option<QueueEntry> {
        self.inner.queues.read().get(session_id).cloned()
    }

    fn install_control_handler(&self) {
        let handler = Arc::new(control::ControlHandler);
        let plan = DeliveryPlan::new().with_local(handler);
        self.inner
            .subscriptions
            .write()
            .insert(SERVER_BUS_SUBJECT.to_string(), Arc::new(plan));
        self.inner
            .reserved
            .write()
            .insert(SERVER_BUS_SUBJECT.to_string());
    }
}
