//! Bundle and framework events for the Tessel module runtime.
//!
//! The framework only knows the [`EventSink`] contract. [`EventBus`] is the
//! stock sink: each fired event goes to every async [`EventReceiver`] first,
//! then to the synchronous [`EventSubscriber`]s in its registry. Synchronous
//! subscribers run on the firing thread, which for lifecycle events still
//! holds the bundle's lock, so they must not call back into that bundle's
//! lifecycle.
//!
//! # Example
//!
//! ```rust
//! use tessel_core::BundleId;
//! use tessel_events::{BundleEventKind, EventBus, EventSink};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.fire_bundle_event(BundleEventKind::Installed, BundleId(1), "com.acme.app");
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "bundle_installed");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;
mod sink;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{BundleEventKind, EventMetadata, FrameworkEventKind, TesselEvent};
pub use sink::{EventSink, NoopEventSink};
pub use subscriber::{
    EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
