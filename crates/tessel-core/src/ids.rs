//! Bundle and revision identifiers.
//!
//! Both identifiers are plain integers handed out by the framework. Every
//! relationship inside the runtime (current revision, attached fragments,
//! wires) is stored as a set of these ids rather than as object references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric bundle identity. The system bundle is always [`BundleId::SYSTEM`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl BundleId {
    /// The framework's own bundle.
    pub const SYSTEM: Self = Self(0);

    /// Get the raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id names the system bundle.
    #[must_use]
    pub const fn is_system(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one revision in the revision arena.
///
/// Revision ids are global and never reused, so a stale id can never be
/// confused with a newer revision of the same bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub u64);

impl RevisionId {
    /// Get the raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_bundle_id() {
        assert!(BundleId::SYSTEM.is_system());
        assert!(!BundleId(7).is_system());
        assert_eq!(BundleId(7).get(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(BundleId(12).to_string(), "12");
        assert_eq!(RevisionId(3).to_string(), "r3");
    }

    #[test]
    fn test_bundle_ids_order_numerically() {
        let mut ids = vec![BundleId(10), BundleId(2), BundleId(5)];
        ids.sort();
        assert_eq!(ids, vec![BundleId(2), BundleId(5), BundleId(10)]);
    }
}
