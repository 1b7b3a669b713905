//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessel_events::prelude::*;` to import all essential types.

pub use crate::{
    BundleEventKind, EventBus, EventFilter, EventMetadata, EventReceiver, EventSink,
    EventSubscriber, FilterSubscriber, FrameworkEventKind, SubscriberId, SubscriberRegistry,
    TesselEvent,
};
