//! Fan-out of framework events to synchronous listeners and async receivers.

use std::sync::Arc;

use tessel_core::BundleId;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

use crate::event::{BundleEventKind, EventMetadata, FrameworkEventKind, TesselEvent};
use crate::sink::EventSink;
use crate::subscriber::{EventFilter, SubscriberRegistry};

/// Buffered events per async receiver before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Source recorded on events the framework fires through the sink.
const FRAMEWORK_SOURCE: &str = "framework";

/// Delivers every fired event to two audiences.
///
/// Async receivers get the event through a bounded broadcast ring; a receiver
/// that falls behind by more than [`capacity`](Self::capacity) events loses
/// the oldest ones. Synchronous subscribers in the [`SubscriberRegistry`] run
/// on the firing thread after the broadcast, in registration order.
///
/// Clones share both audiences. A synchronous subscriber that owns a clone
/// of the bus keeps the registry alive forever; hold a channel or a `Weak`
/// instead.
#[derive(Debug, Clone)]
pub struct EventBus {
    ring: broadcast::Sender<Arc<TesselEvent>>,
    listeners: Arc<SubscriberRegistry>,
    capacity: usize,
}

impl EventBus {
    /// Bus with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus buffering `capacity` events per receiver (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: broadcast::channel(capacity).0,
            listeners: Arc::new(SubscriberRegistry::new()),
            capacity,
        }
    }

    /// Deliver `event` and return how many async receivers were reached.
    pub fn publish(&self, event: TesselEvent) -> usize {
        let event = Arc::new(event);
        let reached = self.ring.send(Arc::clone(&event)).unwrap_or(0);
        trace!(event_type = %event.event_type(), reached, "event published");
        self.listeners.notify(&event, self);
        reached
    }

    /// Receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.subscribe_filtered(EventFilter::all())
    }

    /// Receiver for events about `bundle` only.
    #[must_use]
    pub fn subscribe_bundle(&self, bundle: BundleId) -> EventReceiver {
        self.subscribe_filtered(EventFilter::all().for_bundle(bundle))
    }

    /// Receiver for events passing `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventReceiver {
        EventReceiver {
            inner: self.ring.subscribe(),
            filter,
        }
    }

    /// Registry of synchronous subscribers.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.listeners
    }

    /// Live async receivers plus registered synchronous subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.ring.receiver_count().saturating_add(self.listeners.len())
    }

    /// Per-receiver buffer size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn fire_bundle_event(&self, kind: BundleEventKind, bundle: BundleId, symbolic_name: &str) {
        self.publish(TesselEvent::Bundle {
            metadata: EventMetadata::new(FRAMEWORK_SOURCE),
            kind,
            bundle,
            symbolic_name: symbolic_name.to_owned(),
        });
    }

    fn fire_framework_event(
        &self,
        kind: FrameworkEventKind,
        bundle: Option<BundleId>,
        error: Option<&str>,
    ) {
        self.publish(TesselEvent::Framework {
            metadata: EventMetadata::new(FRAMEWORK_SOURCE),
            kind,
            bundle,
            error: error.map(str::to_owned),
        });
    }
}

/// Async end of an [`EventBus`] subscription.
#[derive(Debug)]
pub struct EventReceiver {
    inner: broadcast::Receiver<Arc<TesselEvent>>,
    filter: EventFilter,
}

impl EventReceiver {
    /// Wait for the next event passing the filter.
    ///
    /// `None` means every bus clone is gone. Events lost to lag are logged
    /// and skipped.
    pub async fn recv(&mut self) -> Option<Arc<TesselEvent>> {
        loop {
            match self.inner.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => tokio::task::yield_now().await,
                Err(RecvError::Lagged(lost)) => report_lag(lost),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event passing the filter, if any.
    pub fn try_recv(&mut self) -> Option<Arc<TesselEvent>> {
        loop {
            match self.inner.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {},
                Err(TryRecvError::Lagged(lost)) => report_lag(lost),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

fn report_lag(lost: u64) {
    warn!(lost, "event receiver fell behind");
}
