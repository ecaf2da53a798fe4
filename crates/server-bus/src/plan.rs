//! # Delivery Plans
//!
//! A plan resolves one subject to its targets: local handlers in
//! subscription order, plus at most one [`RemoteFanout`] for the subject.
//!
//! Plans are immutable once built. The router swaps a new `Arc<DeliveryPlan>`
//! into its registry on every change and delivers from a cloned `Arc`, so no
//! registry lock is held while handlers run.

use crate::bus::ServerBus;
use crate::errors::BusError;
use crate::message::Message;
use crate::remote::RemoteFanout;
use std::fmt;
use std::sync::Arc;

/// A local message handler.
pub trait MessageCallback: Send + Sync {
    /// Handle one delivered message.
    ///
    /// # Errors
    ///
    /// Any error is reported to the bus failure handler; other targets of
    /// the same plan still receive the message.
    fn callback(&self, bus: &ServerBus, message: &Message) -> Result<(), BusError>;
}

impl<F> MessageCallback for F
where
    F: Fn(&ServerBus, &Message) -> Result<(), BusError> + Send + Sync,
{
    fn callback(&self, bus: &ServerBus, message: &Message) -> Result<(), BusError> {
        self(bus, message)
    }
}

/// Wrap a closure as a shareable [`MessageCallback`].
pub fn handler<F>(f: F) -> Arc<dyn MessageCallback>
where
    F: Fn(&ServerBus, &Message) -> Result<(), BusError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Gate installed with `add_rule`; delivery proceeds only when it accepts.
pub type DeliveryRule = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// One entry of a plan.
#[derive(Clone)]
pub enum DeliveryTarget {
    Local(Arc<dyn MessageCallback>),
    Remote(Arc<RemoteFanout>),
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Local(..)"),
            Self::Remote(fanout) => f.debug_tuple("Remote").field(fanout).finish(),
        }
    }
}

/// Outcome of delivering one message through a plan.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Targets that were invoked.
    pub targets: usize,
    /// A rule turned the message away; no target was invoked.
    pub rejected: bool,
    /// Per-target failures.
    pub failures: Vec<BusError>,
}

/// Fan-out list for one subject.
#[derive(Clone, Default)]
pub struct DeliveryPlan {
    targets: Vec<DeliveryTarget>,
    rules: Vec<DeliveryRule>,
}

impl DeliveryPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this plan with `callback` appended.
    #[must_use]
    pub fn with_local(&self, callback: Arc<dyn MessageCallback>) -> Self {
        let mut plan = self.clone();
        plan.targets.push(DeliveryTarget::Local(callback));
        plan
    }

    /// Copy of this plan bound to `fanout`. A plan that already has a fan-out
    /// keeps it.
    #[must_use]
    pub fn with_remote(&self, fanout: Arc<RemoteFanout>) -> Self {
        let mut plan = self.clone();
        if plan.remote().is_none() {
            plan.targets.push(DeliveryTarget::Remote(fanout));
        }
        plan
    }

    /// Copy of this plan gated by `rule` in addition to existing rules.
    #[must_use]
    pub fn with_rule(&self, rule: DeliveryRule) -> Self {
        let mut plan = self.clone();
        plan.rules.push(rule);
        plan
    }

    /// Copy without local handlers; `None` if nothing would remain.
    #[must_use]
    pub fn without_locals(&self) -> Option<Self> {
        self.retain(|t| matches!(t, DeliveryTarget::Remote(_)))
    }

    /// Copy without the fan-out; `None` if nothing would remain.
    #[must_use]
    pub fn without_remote(&self) -> Option<Self> {
        self.retain(|t| matches!(t, DeliveryTarget::Local(_)))
    }

    fn retain(&self, keep: impl Fn(&DeliveryTarget) -> bool) -> Option<Self> {
        let targets: Vec<_> = self.targets.iter().filter(|t| keep(t)).cloned().collect();
        if targets.is_empty() {
            return None;
        }
        Some(Self {
            targets,
            rules: self.rules.clone(),
        })
    }

    #[must_use]
    pub fn remote(&self) -> Option<&Arc<RemoteFanout>> {
        self.targets.iter().find_map(|t| match t {
            DeliveryTarget::Remote(fanout) => Some(fanout),
            DeliveryTarget::Local(_) => None,
        })
    }

    #[must_use]
    pub fn local_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t, DeliveryTarget::Local(_)))
            .count()
    }

    /// Local handlers plus remote queues behind the fan-out.
    #[must_use]
    pub fn total_receivers(&self) -> usize {
        self.local_count() + self.remote().map_or(0, |f| f.len())
    }

    #[must_use]
    pub fn targets(&self) -> &[DeliveryTarget] {
        &self.targets
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether every installed rule accepts `message`.
    #[must_use]
    pub fn accepts(&self, message: &Message) -> bool {
        self.rules.iter().all(|rule| rule(message))
    }

    /// Deliver `message` to every target in order.
    ///
    /// A failing target never stops delivery to the remaining ones.
    pub fn deliver(&self, bus: &ServerBus, message: &Message) -> Delivery {
        if !self.accepts(message) {
            return Delivery {
                rejected: true,
                ..Delivery::default()
            };
        }

        let mut delivery = Delivery::default();
        for target in &self.targets {
            delivery.targets += 1;
            match target {
                DeliveryTarget::Local(callback) => {
                    if let Err(e) = callback.callback(bus, message) {
                        delivery.failures.push(e);
                    }
                }
                DeliveryTarget::Remote(fanout) => fanout.fan_out(bus, message),
            }
        }
        delivery
    }
}

impl fmt::Debug for DeliveryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryPlan")
            .field("targets", &self.targets)
            .field("rules", &self.rules.len())
            .finish()
    }
}
