//! Synchronous subscriber registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tessel_core::BundleId;
use tracing::trace;

use crate::bus::EventBus;
use crate::event::TesselEvent;

/// Identifier handed out when a subscriber is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A handler invoked synchronously for every published event.
pub trait EventSubscriber: Send + Sync {
    /// Handle an event. `bus` is the bus that published it.
    fn on_event(&self, event: &TesselEvent, bus: &EventBus);

    /// Whether this subscriber wants the event at all.
    fn accepts(&self, _event: &TesselEvent) -> bool {
        true
    }
}

/// Selects events by bundle and/or event type.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    bundle: Option<BundleId>,
    event_types: Vec<String>,
}

impl EventFilter {
    /// A filter that accepts every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only accept events about `bundle`.
    #[must_use]
    pub fn for_bundle(mut self, bundle: BundleId) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Only accept events whose [`TesselEvent::event_type`] is `event_type`.
    /// May be called several times to accept several types.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    /// Whether the event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &TesselEvent) -> bool {
        if let Some(bundle) = self.bundle
            && event.bundle() != Some(bundle)
        {
            return false;
        }
        self.event_types.is_empty() || self.event_types.contains(&event.event_type())
    }
}

/// Closure-backed subscriber with an optional filter.
pub struct FilterSubscriber {
    name: String,
    filter: EventFilter,
    handler: Box<dyn Fn(&TesselEvent) + Send + Sync>,
}

impl FilterSubscriber {
    /// Create a subscriber that receives every event.
    pub fn new(name: impl Into<String>, handler: impl Fn(&TesselEvent) + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            filter: EventFilter::all(),
            handler: Box::new(handler),
        }
    }

    /// Restrict the subscriber to events passing `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The subscriber's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for FilterSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSubscriber")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl EventSubscriber for FilterSubscriber {
    fn on_event(&self, event: &TesselEvent, _bus: &EventBus) {
        (self.handler)(event);
    }

    fn accepts(&self, event: &TesselEvent) -> bool {
        self.filter.matches(event)
    }
}

/// Registry of synchronous subscribers.
///
/// `notify` snapshots the subscriber list before calling out, so a
/// subscriber may register or unregister (itself included) from inside
/// `on_event` without deadlocking.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<Vec<(SubscriberId, Arc<dyn EventSubscriber>)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        trace!(subscriber_id = %id, "Registered event subscriber");
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        // Take the subscriber out under the lock but drop it after releasing
        // the lock: its Drop impl may publish.
        let removed = {
            let mut subs = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subs.iter()
                .position(|(sid, _)| *sid == id)
                .map(|pos| subs.remove(pos))
        };
        removed.is_some()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no subscribers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every accepting subscriber, in registration order.
    pub(crate) fn notify(&self, event: &TesselEvent, bus: &EventBus) {
        let snapshot: Vec<Arc<dyn EventSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in snapshot {
            if subscriber.accepts(event) {
                subscriber.on_event(event, bus);
            }
        }
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.len())
            .finish()
    }
}
