//! Bounded fan-out event bus.
//!
//! Every subscription owns its own bounded queue. Publishing never waits:
//! when one subscriber's queue is full the event is dropped for that
//! subscriber only and counted in the bus metrics.

use super::{Event, EventKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Default per-subscription queue capacity.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 100;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// Delivery counters for one event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetrics {
    /// Events accepted for delivery.
    pub published: u64,
    /// Per-subscriber deliveries that were queued.
    pub delivered: u64,
    /// Per-subscriber deliveries dropped because a queue was full.
    pub dropped: u64,
    /// Events rejected because their payload failed validation.
    pub rejected: u64,
}

/// Outcome of publishing one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose queue accepted the event.
    pub delivered: usize,
    /// Subscribers that missed the event because their queue was full.
    pub dropped: usize,
    /// Whether the event was rejected before delivery.
    pub rejected: bool,
}

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<Event>,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    subscribers: HashMap<EventKind, Vec<Subscriber>>,
    metrics: HashMap<EventKind, BusMetrics>,
}

struct BusInner {
    capacity: usize,
    state: Mutex<BusState>,
}

/// Publish/subscribe hub for upstream events.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("total_subscribers", &self.total_subscribers())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus whose subscriptions buffer up to `capacity` events.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                state: Mutex::new(BusState::default()),
            }),
        }
    }

    /// Returns the per-subscription queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Registers interest in one event kind.
    ///
    /// The subscription observes every event of that kind published after
    /// this call, in publication order. Subscribing to a closed bus yields a
    /// subscription that is already finished.
    #[must_use]
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let id = SubscriptionId::new();
        let mut state = self.lock_state();
        if !state.closed {
            state
                .subscribers
                .entry(kind)
                .or_default()
                .push(Subscriber { id, sender });
            tracing::debug!(subscription = %id, kind = %kind, "subscribed to event bus");
        }
        Subscription { id, kind, receiver }
    }

    /// Removes a subscription. Its queue still drains what it holds.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock_state();
        for subscribers in state.subscribers.values_mut() {
            subscribers.retain(|subscriber| subscriber.id != id);
        }
    }

    /// Delivers `event` to every current subscriber of its kind.
    ///
    /// Never blocks. Invalid events are logged and dropped; events that do
    /// not fit in a subscriber's queue are dropped for that subscriber only.
    pub fn publish(&self, event: Event) -> PublishReport {
        let kind = event.kind();
        let mut report = PublishReport::default();
        let mut state = self.lock_state();

        if state.closed {
            return report;
        }

        if let Err(err) = event.validate() {
            tracing::warn!(error = %err, "dropping invalid event");
            state.metrics.entry(kind).or_default().rejected += 1;
            report.rejected = true;
            return report;
        }

        let BusState {
            subscribers,
            metrics,
            ..
        } = &mut *state;
        let counters = metrics.entry(kind).or_default();
        counters.published += 1;

        if let Some(listeners) = subscribers.get_mut(&kind) {
            listeners.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    counters.delivered += 1;
                    true
                }
                Err(TrySendError::Full(dropped)) => {
                    report.dropped += 1;
                    counters.dropped += 1;
                    tracing::warn!(
                        subscription = %subscriber.id,
                        kind = %kind,
                        server = %dropped.server_name(),
                        "subscriber queue full, dropping event"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscription = %subscriber.id, "pruning closed subscription");
                    false
                }
            });
        }

        report
    }

    /// Returns how many live subscriptions exist for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock_state()
            .subscribers
            .get(&kind)
            .map_or(0, |listeners| {
                listeners
                    .iter()
                    .filter(|subscriber| !subscriber.sender.is_closed())
                    .count()
            })
    }

    /// Returns how many live subscriptions exist across all kinds.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        EventKind::ALL
            .into_iter()
            .map(|kind| self.subscriber_count(kind))
            .sum()
    }

    /// Returns the delivery counters for `kind`.
    #[must_use]
    pub fn metrics(&self, kind: EventKind) -> BusMetrics {
        self.lock_state()
            .metrics
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    /// Closes the bus.
    ///
    /// Existing subscriptions deliver what they already hold and then end.
    /// Later publishes are ignored.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        state.closed = true;
        state.subscribers.clear();
        tracing::debug!("event bus closed");
    }

    /// Returns whether [`EventBus::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        // No critical section can leave the state half-updated.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Returns the subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the subscribed event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the bus is closed or the subscription removed and
    /// the queue has drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}
