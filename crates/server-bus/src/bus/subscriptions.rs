//! Local and remote subscription management.

use super::{BusInner, ServerBus};
use crate::errors::BusError;
use crate::listeners::{ListenerAction, SubscriptionEvent};
use crate::message::{parts, ControlCommand, Message};
use crate::plan::{DeliveryPlan, MessageCallback};
use crate::remote::RemoteFanout;
use crate::session::SessionId;
use crate::{CLIENT_BUS_SUBJECT, LOCAL_PREFIX};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

impl ServerBus {
    // =========================================================================
    // LOCAL SUBSCRIPTIONS
    // =========================================================================

    /// Register a local handler for `subject` and advertise it to remote
    /// peers (unless the subject carries the `local:` prefix).
    ///
    /// # Errors
    ///
    /// `BusError::ReservedSubject` if the subject is locked.
    pub fn subscribe<F>(&self, subject: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(&ServerBus, &Message) -> Result<(), BusError> + Send + Sync + 'static,
    {
        self.add_local(subject, Arc::new(handler), false)
    }

    /// Like [`subscribe`](Self::subscribe) but never advertised remotely.
    ///
    /// # Errors
    ///
    /// `BusError::ReservedSubject` if the subject is locked.
    pub fn subscribe_local<F>(&self, subject: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(&ServerBus, &Message) -> Result<(), BusError> + Send + Sync + 'static,
    {
        self.add_local(subject, Arc::new(handler), true)
    }

    /// Register an already shared handler.
    ///
    /// # Errors
    ///
    /// `BusError::ReservedSubject` if the subject is locked.
    pub fn subscribe_with(
        &self,
        subject: &str,
        handler: Arc<dyn MessageCallback>,
        local_only: bool,
    ) -> Result<(), BusError> {
        self.add_local(subject, handler, local_only)
    }

    fn add_local(
        &self,
        subject: &str,
        handler: Arc<dyn MessageCallback>,
        local_only: bool,
    ) -> Result<(), BusError> {
        let (receivers, is_new) = {
            let mut subscriptions = self.inner.subscriptions.write();
            if self.inner.reserved.read().contains(subject) {
                return Err(reserved(subject));
            }
            let existing = subscriptions.get(subject).cloned();
            let is_new = existing.is_none();
            let plan = existing
                .map_or_else(DeliveryPlan::new, |plan| (*plan).clone())
                .with_local(handler);
            let receivers = plan.total_receivers();
            subscriptions.insert(subject.to_string(), Arc::new(plan));
            (receivers, is_new)
        };

        debug!(subject, receivers, local_only, "Local subscription added");
        let event = SubscriptionEvent::local(subject, receivers, is_new, local_only);
        self.inner
            .subscribe_listeners
            .fire(|listener| listener.on_subscribe(&event));
        self.with_monitor(|m| m.notify_new_subscription(subject, None));
        Ok(())
    }

    /// Remove every local handler for `subject`. A remote fan-out for the
    /// same subject stays in place.
    ///
    /// # Errors
    ///
    /// `BusError::ReservedSubject` if the subject is locked.
    pub fn unsubscribe_all(&self, subject: &str) -> Result<(), BusError> {
        let receivers = {
            let mut subscriptions = self.inner.subscriptions.write();
            if self.inner.reserved.read().contains(subject) {
                return Err(reserved(subject));
            }
            let Some(plan) = subscriptions.get(subject).cloned() else {
                return Ok(());
            };
            if plan.local_count() == 0 {
                return Ok(());
            }
            match plan.without_locals() {
                Some(remaining) => {
                    let receivers = remaining.total_receivers();
                    subscriptions.insert(subject.to_string(), Arc::new(remaining));
                    receivers
                }
                None => {
                    subscriptions.remove(subject);
                    0
                }
            }
        };

        debug!(subject, receivers, "Local subscriptions removed");
        let event = SubscriptionEvent::local(subject, receivers, false, false);
        self.inner
            .unsubscribe_listeners
            .fire(|listener| listener.on_unsubscribe(&event));
        self.with_monitor(|m| m.notify_unsubscription(subject, None));
        Ok(())
    }

    /// Gate delivery on `subject` with `rule`.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownSubject` if the subject has no delivery plan yet.
    pub fn add_rule<F>(&self, subject: &str, rule: F) -> Result<(), BusError>
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let mut subscriptions = self.inner.subscriptions.write();
        let plan = subscriptions
            .get(subject)
            .ok_or_else(|| BusError::UnknownSubject {
                subject: subject.to_string(),
            })?
            .with_rule(Arc::new(rule));
        subscriptions.insert(subject.to_string(), Arc::new(plan));
        Ok(())
    }

    // =========================================================================
    // REMOTE SUBSCRIPTIONS
    // =========================================================================

    /// Make the queue of `session_id` a fan-out target for `subject`.
    ///
    /// # Errors
    ///
    /// `BusError::QueueUnavailable` if the session has no queue.
    pub fn remote_subscribe(&self, session_id: &SessionId, subject: &str) -> Result<(), BusError> {
        let (added, created, receivers) = {
            // Held across the fan-out update so a concurrent eviction cannot
            // withdraw the session in between.
            let queues = self.inner.queues.read();
            if !queues.contains_key(session_id) {
                return Err(BusError::QueueUnavailable {
                    session_id: session_id.clone(),
                });
            }
            let mut subscriptions = self.inner.subscriptions.write();
            let mut remotes = self.inner.remote_subscriptions.write();

            let (fanout, created) = match remotes.get(subject) {
                Some(fanout) => (Arc::clone(fanout), false),
                None => {
                    let fanout = Arc::new(RemoteFanout::new(subject));
                    remotes.insert(subject.to_string(), Arc::clone(&fanout));
                    (fanout, true)
                }
            };
            let added = fanout.add(session_id);

            if created {
                let plan = subscriptions
                    .get(subject)
                    .map_or_else(DeliveryPlan::new, |plan| (**plan).clone())
                    .with_remote(fanout);
                subscriptions.insert(subject.to_string(), Arc::new(plan));
            }
            let receivers = subscriptions
                .get(subject)
                .map_or(0, |plan| plan.total_receivers());
            (added, created, receivers)
        };

        if !added {
            return Ok(());
        }

        debug!(subject, session_id = %session_id, receivers, "Remote subscription added");
        let event = SubscriptionEvent::remote(subject, session_id, receivers, created);
        self.inner
            .subscribe_listeners
            .fire(|listener| listener.on_subscribe(&event));
        self.with_monitor(|m| m.notify_new_subscription(subject, Some(session_id)));
        Ok(())
    }

    /// Withdraw the queue of `session_id` from the fan-out for `subject` and
    /// purge messages for that subject still waiting in the queue.
    pub fn remote_unsubscribe(&self, session_id: &SessionId, subject: &str) {
        let event = {
            let mut subscriptions = self.inner.subscriptions.write();
            let mut remotes = self.inner.remote_subscriptions.write();
            withdraw_target(&mut subscriptions, &mut remotes, subject, session_id)
        };
        let Some(event) = event else {
            return;
        };

        if let Some(queue) = self.queue(session_id) {
            let purged = queue.purge_subject(subject);
            if purged > 0 {
                debug!(subject, session_id = %session_id, purged, "Purged undeliverable messages");
            }
        }
        self.notify_remote_unsubscribed(&event);
    }

    /// Withdraw `session_id` from every fan-out without notifying anyone.
    ///
    /// Callers hold the `queues` write lock (order `queues → subscriptions →
    /// remote_subscriptions`), so a reconnect under the same session id
    /// cannot interleave and lose its fresh subscriptions.
    pub(crate) fn withdraw_all_targets(&self, session_id: &SessionId) -> Vec<SubscriptionEvent> {
        let mut subscriptions = self.inner.subscriptions.write();
        let mut remotes = self.inner.remote_subscriptions.write();
        let subjects: Vec<String> = remotes
            .iter()
            .filter(|(_, fanout)| fanout.contains(session_id))
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects
            .iter()
            .filter_map(|subject| {
                withdraw_target(&mut subscriptions, &mut remotes, subject, session_id)
            })
            .collect()
    }

    /// Fire unsubscribe listeners and the monitor for a withdrawn target.
    pub(crate) fn notify_remote_unsubscribed(&self, event: &SubscriptionEvent) {
        debug!(
            subject = %event.subject,
            session_id = ?event.session_id,
            receivers = event.receivers,
            "Remote subscription removed"
        );
        self.inner
            .unsubscribe_listeners
            .fire(|listener| listener.on_unsubscribe(event));
        self.with_monitor(|m| m.notify_unsubscription(&event.subject, event.session_id.as_ref()));
    }

    // =========================================================================
    // REMOTE ADVERTISEMENT
    // =========================================================================

    /// Tell connected peers about local subscription changes.
    pub(super) fn install_remote_advertisers(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.add_subscribe_listener(Arc::new(move |event: &SubscriptionEvent| {
            advertise(&weak, event, ControlCommand::RemoteSubscribe)
        }));

        let weak = Arc::downgrade(&self.inner);
        self.add_unsubscribe_listener(Arc::new(move |event: &SubscriptionEvent| {
            advertise(&weak, event, ControlCommand::RemoteUnsubscribe)
        }));
    }
}

fn advertise(
    bus: &Weak<BusInner>,
    event: &SubscriptionEvent,
    command: ControlCommand,
) -> ListenerAction {
    let Some(inner) = bus.upgrade() else {
        return ListenerAction::Dispose;
    };
    if event.remote || event.local_only || event.subject.starts_with(LOCAL_PREFIX) {
        return ListenerAction::Keep;
    }

    let bus = ServerBus::from_inner(inner);
    if bus.queue_count() == 0 || bus.is_stopped() {
        return ListenerAction::Keep;
    }

    debug!(subject = %event.subject, command = %command, "Advertising subscription change to peers");
    let mut notice =
        Message::control(CLIENT_BUS_SUBJECT, command).with(parts::SUBJECT, event.subject.as_str());
    notice.commit();
    bus.route_global(notice);
    ListenerAction::Keep
}

fn reserved(subject: &str) -> BusError {
    BusError::ReservedSubject {
        subject: subject.to_string(),
    }
}

/// Remove `session_id` from the fan-out for `subject`, dropping the fan-out
/// (and the plan, if nothing else remains) once it is empty. `None` if the
/// session was not a target.
fn withdraw_target(
    subscriptions: &mut HashMap<String, Arc<DeliveryPlan>>,
    remotes: &mut HashMap<String, Arc<RemoteFanout>>,
    subject: &str,
    session_id: &SessionId,
) -> Option<SubscriptionEvent> {
    let fanout = remotes.get(subject).cloned()?;
    if !fanout.remove(session_id) {
        return None;
    }

    let last = fanout.is_empty();
    if last {
        remotes.remove(subject);
        match subscriptions.get(subject).and_then(|plan| plan.without_remote()) {
            Some(plan) => {
                subscriptions.insert(subject.to_string(), Arc::new(plan));
            }
            None => {
                subscriptions.remove(subject);
            }
        }
    }
    let receivers = subscriptions
        .get(subject)
        .map_or(0, |plan| plan.total_receivers());

    let mut event = SubscriptionEvent::remote(subject, session_id, receivers, false);
    event.last_remote = last;
    Some(event)
}
