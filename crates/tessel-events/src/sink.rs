//! The event sink contract used by the framework.

use tessel_core::BundleId;

use crate::event::{BundleEventKind, FrameworkEventKind};

/// Receives every state transition and every isolated bulk-operation failure.
///
/// Implementations are called synchronously on the thread performing the
/// transition, usually while that thread holds the bundle's lifecycle lock.
/// They must not block on lifecycle operations of the same bundle.
pub trait EventSink: Send + Sync {
    /// A bundle changed state.
    fn fire_bundle_event(&self, kind: BundleEventKind, bundle: BundleId, symbolic_name: &str);

    /// A framework-level notification, optionally naming a bundle and cause.
    fn fire_framework_event(
        &self,
        kind: FrameworkEventKind,
        bundle: Option<BundleId>,
        error: Option<&str>,
    );
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn fire_bundle_event(&self, _kind: BundleEventKind, _bundle: BundleId, _symbolic_name: &str) {}

    fn fire_framework_event(
        &self,
        _kind: FrameworkEventKind,
        _bundle: Option<BundleId>,
        _error: Option<&str>,
    ) {
    }
}
