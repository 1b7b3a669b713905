//! Bundle lifecycle state and bundle kind.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle state of a bundle.
///
/// `Installed → Resolved ⇄ Starting → Active → Stopping → Resolved`, and any
/// state may move to the terminal `Uninstalled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleState {
    /// Installed but not resolved.
    Installed,
    /// Resolved; its current revision has a wiring.
    Resolved,
    /// The activator start hook is running (or lazy activation is pending).
    Starting,
    /// Started successfully.
    Active,
    /// The activator stop hook is running.
    Stopping,
    /// Uninstalled. May linger as a zombie while its wirings are in use.
    Uninstalled,
}

impl BundleState {
    /// Whether the bundle's current revision is wired.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Starting | Self::Active | Self::Stopping
        )
    }

    /// Whether the bundle is started or in the middle of a start/stop.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Stopping)
    }

    /// Whether the bundle is active or starting.
    #[must_use]
    pub const fn is_active_or_starting(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }

    /// Stable upper-case name, as used in events and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "INSTALLED",
            Self::Resolved => "RESOLVED",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Stopping => "STOPPING",
            Self::Uninstalled => "UNINSTALLED",
        }
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of bundle a revision belongs to.
///
/// The lifecycle driver is shared; it branches on kind only where behaviour
/// differs (fragments reject `start`, the system bundle rejects most
/// mutations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    /// The framework's own bundle.
    System,
    /// A regular bundle that owns a class-loading module.
    Host,
    /// A fragment that contributes content to attached hosts.
    Fragment,
}

impl BundleKind {
    /// Whether this is a fragment.
    #[must_use]
    pub const fn is_fragment(self) -> bool {
        matches!(self, Self::Fragment)
    }
}
