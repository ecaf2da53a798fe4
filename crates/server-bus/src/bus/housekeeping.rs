//! Stale queue eviction and queue teardown.

use super::{BusInner, QueueEntry, ServerBus};
use crate::listeners::{QueueClosedEvent, SubscriptionEvent};
use crate::queue::MessageQueue;
use crate::session::SessionId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Background task: run a housekeeping pass every configured interval until
/// the bus stops or is dropped.
pub(super) fn spawn_housekeeper(inner: &Arc<BusInner>, mut shutdown: watch::Receiver<bool>) {
    let bus = Arc::downgrade(inner);
    let period = inner.config.housekeeping_interval;

    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = bus.upgrade() else {
                        break;
                    };
                    let evicted = ServerBus::from_inner(inner).run_housekeeping();
                    if evicted > 0 {
                        debug!(evicted, "Housekeeping pass evicted stale queues");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Housekeeper stopped");
    });
}

impl ServerBus {
    /// One housekeeping pass: evict every stale queue.
    ///
    /// Works from a snapshot of the registry. A queue is only removed if the
    /// registry still maps its session to that same queue and it is still
    /// stale, so a queue replaced or refreshed in between is left alone and
    /// no queue is processed twice.
    pub fn run_housekeeping(&self) -> usize {
        let candidates: Vec<(SessionId, Arc<MessageQueue>)> = self
            .inner
            .queues
            .read()
            .iter()
            .filter(|(_, entry)| entry.queue.is_stale())
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.queue)))
            .collect();

        let mut evicted = 0;
        for (session_id, queue) in candidates {
            let retired = {
                let mut queues = self.inner.queues.write();
                let still_current = queues
                    .get(&session_id)
                    .is_some_and(|e| Arc::ptr_eq(&e.queue, &queue) && queue.is_stale());
                if still_current {
                    queues
                        .remove(&session_id)
                        .map(|entry| (entry, self.withdraw_all_targets(&session_id)))
                } else {
                    None
                }
            };

            if let Some((entry, withdrawn)) = retired {
                info!(session_id = %session_id, "Evicting stale queue");
                self.retire_queue(&session_id, &entry, &withdrawn, true);
                self.inner.stats.evicted.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }
        evicted
    }

    /// Close the queue of `session_id` and drop its subscriptions.
    /// `false` if the session had no queue.
    pub fn close_queue(&self, session_id: &SessionId) -> bool {
        let retired = {
            let mut queues = self.inner.queues.write();
            queues
                .remove(session_id)
                .map(|entry| (entry, self.withdraw_all_targets(session_id)))
        };
        match retired {
            Some((entry, withdrawn)) => {
                self.retire_queue(session_id, &entry, &withdrawn, false);
                true
            }
            None => false,
        }
    }

    /// Teardown of a queue already removed from the registry and withdrawn
    /// from every fan-out: report the withdrawals, close the queue
    /// (discarding its deferred buffer), optionally end its session, then
    /// notify.
    fn retire_queue(
        &self,
        session_id: &SessionId,
        entry: &QueueEntry,
        withdrawn: &[SubscriptionEvent],
        end_session: bool,
    ) {
        for event in withdrawn {
            self.notify_remote_unsubscribed(event);
        }
        entry.queue.stop_queue();
        if end_session {
            entry.session.end_session();
        }

        let event = QueueClosedEvent {
            session_id: session_id.clone(),
        };
        self.inner
            .queue_closed_listeners
            .fire(|listener| listener.on_queue_closed(&event));
        self.with_monitor(|m| m.notify_queue_detached(session_id));
    }
}
