//! # Listener Hooks
//!
//! Subscribe, unsubscribe and queue-closed observers, plus global message
//! listeners that may veto a send.
//!
//! Each kind has its own lock, so firing one kind never blocks registration
//! of another. Listeners fire synchronously in registration order on a
//! snapshot of the list, with no lock held, so a listener may subscribe,
//! send or register further listeners from inside its callback. A listener
//! added while an event is firing first sees the next event.

use crate::message::Message;
use crate::session::SessionId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// What a listener wants after it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    /// Stay registered.
    Keep,
    /// Remove this listener (one-shot).
    Dispose,
}

/// A subscription change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    /// The subscriber is a remote queue.
    pub remote: bool,
    /// The subscription must not be advertised to remote peers.
    pub local_only: bool,
    /// Remote session that (un)subscribed.
    pub session_id: Option<SessionId>,
    /// Receivers left on the subject after the change.
    pub receivers: usize,
    /// First subscriber of its kind for the subject.
    pub is_new: bool,
    /// A remote unsubscribe removed the last remote receiver.
    pub last_remote: bool,
    pub subject: String,
}

impl SubscriptionEvent {
    /// Local subscribe/unsubscribe event.
    #[must_use]
    pub fn local(subject: &str, receivers: usize, is_new: bool, local_only: bool) -> Self {
        Self {
            remote: false,
            local_only,
            session_id: None,
            receivers,
            is_new,
            last_remote: false,
            subject: subject.to_string(),
        }
    }

    /// Remote subscribe/unsubscribe event for `session_id`.
    #[must_use]
    pub fn remote(subject: &str, session_id: &SessionId, receivers: usize, is_new: bool) -> Self {
        Self {
            remote: true,
            local_only: false,
            session_id: Some(session_id.clone()),
            receivers,
            is_new,
            last_remote: false,
            subject: subject.to_string(),
        }
    }
}

/// A queue was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueClosedEvent {
    pub session_id: SessionId,
}

pub trait SubscribeListener: Send + Sync {
    fn on_subscribe(&self, event: &SubscriptionEvent) -> ListenerAction;
}

pub trait UnsubscribeListener: Send + Sync {
    fn on_unsubscribe(&self, event: &SubscriptionEvent) -> ListenerAction;
}

pub trait QueueClosedListener: Send + Sync {
    fn on_queue_closed(&self, event: &QueueClosedEvent) -> ListenerAction;
}

/// Observer consulted before every send; returning `false` vetoes delivery.
pub trait MessageListener: Send + Sync {
    fn handle_message(&self, message: &Message) -> bool;
}

impl<F> SubscribeListener for F
where
    F: Fn(&SubscriptionEvent) -> ListenerAction + Send + Sync,
{
    fn on_subscribe(&self, event: &SubscriptionEvent) -> ListenerAction {
        self(event)
    }
}

impl<F> UnsubscribeListener for F
where
    F: Fn(&SubscriptionEvent) -> ListenerAction + Send + Sync,
{
    fn on_unsubscribe(&self, event: &SubscriptionEvent) -> ListenerAction {
        self(event)
    }
}

impl<F> QueueClosedListener for F
where
    F: Fn(&QueueClosedEvent) -> ListenerAction + Send + Sync,
{
    fn on_queue_closed(&self, event: &QueueClosedEvent) -> ListenerAction {
        self(event)
    }
}

impl<F> MessageListener for F
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    fn handle_message(&self, message: &Message) -> bool {
        self(message)
    }
}

/// Ordered listener list with its own lock.
pub struct ListenerList<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerList<L> {
    pub fn add(&self, listener: Arc<L>) {
        self.listeners.lock().push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire every listener in order, dropping those that ask to be disposed.
    pub fn fire(&self, mut notify: impl FnMut(&L) -> ListenerAction) {
        let snapshot: Vec<Arc<L>> = self.listeners.lock().clone();
        let disposed: Vec<Arc<L>> = snapshot
            .into_iter()
            .filter(|listener| notify(&**listener) == ListenerAction::Dispose)
            .collect();
        if !disposed.is_empty() {
            self.listeners
                .lock()
                .retain(|listener| !disposed.iter().any(|d| Arc::ptr_eq(d, listener)));
        }
    }
}

/// Global listeners; read-mostly.
#[derive(Default)]
pub struct GlobalListeners {
    listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
}

impl GlobalListeners {
    pub fn add(&self, listener: Arc<dyn MessageListener>) {
        self.listeners.write().push(listener);
    }

    /// Consult every listener; `false` if any vetoed. All listeners run.
    pub fn allow(&self, message: &Message) -> bool {
        let listeners: Vec<Arc<dyn MessageListener>> = self.listeners.read().clone();
        listeners
            .iter()
            .fold(true, |allowed, l| l.handle_message(message) && allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_in_registration_order() {
        let list: ListenerList<dyn SubscribeListener> = ListenerList::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            list.add(Arc::new(move |_: &SubscriptionEvent| {
                seen.lock().push(id);
                ListenerAction::Keep
            }));
        }

        let event = SubscriptionEvent::local("A", 1, true, false);
        list.fire(|l| l.on_subscribe(&event));
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_one_shot_listener_removed() {
        let list: ListenerList<dyn SubscribeListener> = ListenerList::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        list.add(Arc::new(move |_: &SubscriptionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            ListenerAction::Dispose
        }));
        list.add(Arc::new(|_: &SubscriptionEvent| ListenerAction::Keep));

        let event = SubscriptionEvent::local("A", 1, true, false);
        list.fire(|l| l.on_subscribe(&event));
        list.fire(|l| l.on_subscribe(&event));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_listener_may_register_from_callback() {
        let list: Arc<ListenerList<dyn SubscribeListener>> = Arc::new(ListenerList::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::clone(&list);
        let counter = Arc::clone(&calls);
        list.add(Arc::new(move |_: &SubscriptionEvent| {
            let counter = Arc::clone(&counter);
            registry.add(Arc::new(move |_: &SubscriptionEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                ListenerAction::Keep
            }));
            ListenerAction::Dispose
        }));

        let event = SubscriptionEvent::local("A", 1, true, false);
        list.fire(|l| l.on_subscribe(&event));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(list.len(), 1);

        list.fire(|l| l.on_subscribe(&event));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_listener_veto_runs_all() {
        let globals = GlobalListeners::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&calls);
        let c2 = Arc::clone(&calls);
        globals.add(Arc::new(move |_: &Message| {
            c1.fetch_add(1, Ordering::SeqCst);
            false
        }));
        globals.add(Arc::new(move |_: &Message| {
            c2.fetch_add(1, Ordering::SeqCst);
            true
        }));

        assert!(!globals.allow(&Message::new("A")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_closure_listener() {
        let list: ListenerList<dyn UnsubscribeListener> = ListenerList::default();
        list.add(Arc::new(|e: &SubscriptionEvent| {
            assert_eq!(e.subject, "A");
            ListenerAction::Keep
        }));
        let event = SubscriptionEvent::local("A", 0, false, false);
        list.fire(|l| l.on_unsubscribe(&event));
        assert_eq!(list.len(), 1);
    }
}
