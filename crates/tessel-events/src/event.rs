//! Event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessel_core::BundleId;
use uuid::Uuid;

/// Metadata carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Component that fired the event.
    pub source: String,
}

impl EventMetadata {
    /// Create metadata stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }
}

/// Per-bundle lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleEventKind {
    /// The bundle was installed.
    Installed,
    /// The bundle's current revision was wired.
    Resolved,
    /// The bundle is waiting for its first class load before activating.
    LazyActivation,
    /// The activator start hook is about to run.
    Starting,
    /// The bundle is active.
    Started,
    /// The activator stop hook is about to run.
    Stopping,
    /// The bundle stopped (or its failed start was unwound).
    Stopped,
    /// A new revision became current.
    Updated,
    /// The bundle lost its wiring.
    Unresolved,
    /// The bundle was uninstalled.
    Uninstalled,
}

impl BundleEventKind {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Resolved => "resolved",
            Self::LazyActivation => "lazy_activation",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Updated => "updated",
            Self::Unresolved => "unresolved",
            Self::Uninstalled => "uninstalled",
        }
    }
}

/// Framework-wide notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkEventKind {
    /// The framework finished launching.
    Started,
    /// A failure the framework caught while driving a bulk operation.
    Error,
    /// A recoverable problem worth surfacing.
    Warning,
    /// A refresh batch completed.
    PackagesRefreshed,
    /// The framework start level reached a new target.
    StartLevelChanged,
    /// The framework shut down.
    Stopped,
}

impl FrameworkEventKind {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::PackagesRefreshed => "packages_refreshed",
            Self::StartLevelChanged => "start_level_changed",
            Self::Stopped => "stopped",
        }
    }
}

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TesselEvent {
    /// A bundle lifecycle transition.
    Bundle {
        /// Event metadata.
        metadata: EventMetadata,
        /// What happened.
        kind: BundleEventKind,
        /// The bundle it happened to.
        bundle: BundleId,
        /// The bundle's symbolic name at the time of the event.
        symbolic_name: String,
    },
    /// A framework notification.
    Framework {
        /// Event metadata.
        metadata: EventMetadata,
        /// What happened.
        kind: FrameworkEventKind,
        /// The bundle involved, if any.
        bundle: Option<BundleId>,
        /// Rendered error, for `Error`/`Warning` events.
        error: Option<String>,
    },
}

impl TesselEvent {
    /// Stable event type string, e.g. `bundle_started` or `framework_error`.
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::Bundle { kind, .. } => format!("bundle_{}", kind.as_str()),
            Self::Framework { kind, .. } => format!("framework_{}", kind.as_str()),
        }
    }

    /// Event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::Bundle { metadata, .. } | Self::Framework { metadata, .. } => metadata,
        }
    }

    /// The bundle this event concerns, if any.
    #[must_use]
    pub fn bundle(&self) -> Option<BundleId> {
        match self {
            Self::Bundle { bundle, .. } => Some(*bundle),
            Self::Framework { bundle, .. } => *bundle,
        }
    }

    /// The bundle event kind, if this is a bundle event.
    #[must_use]
    pub fn bundle_kind(&self) -> Option<BundleEventKind> {
        match self {
            Self::Bundle { kind, .. } => Some(*kind),
            Self::Framework { .. } => None,
        }
    }

    /// The framework event kind, if this is a framework event.
    #[must_use]
    pub fn framework_kind(&self) -> Option<FrameworkEventKind> {
        match self {
            Self::Framework { kind, .. } => Some(*kind),
            Self::Bundle { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let event = TesselEvent::Bundle {
            metadata: EventMetadata::new("test"),
            kind: BundleEventKind::LazyActivation,
            bundle: BundleId(3),
            symbolic_name: "a".into(),
        };
        assert_eq!(event.event_type(), "bundle_lazy_activation");
        assert_eq!(event.bundle(), Some(BundleId(3)));
        assert_eq!(event.bundle_kind(), Some(BundleEventKind::LazyActivation));
        assert_eq!(event.framework_kind(), None);

        let event = TesselEvent::Framework {
            metadata: EventMetadata::new("test"),
            kind: FrameworkEventKind::PackagesRefreshed,
            bundle: None,
            error: None,
        };
        assert_eq!(event.event_type(), "framework_packages_refreshed");
        assert_eq!(event.bundle(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = TesselEvent::Framework {
            metadata: EventMetadata::new("refresh"),
            kind: FrameworkEventKind::Error,
            bundle: Some(BundleId(4)),
            error: Some("boom".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"framework\""));
        assert!(json.contains("\"kind\":\"error\""));
        let back: TesselEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
