use dashmap::DashMap;
use tessel_core::BundleId;

/// Per-bundle persisted state.
///
/// The framework writes the "should start" intent and start level and reads
/// them back when it drives bulk start/stop. Storage layout is up to the
/// implementation.
pub trait BundleStorage: Send + Sync {
    /// Whether the bundle should be started when its start level is reached.
    fn is_persistently_started(&self, bundle: BundleId) -> bool;

    /// The bundle's persisted start level, if one was set.
    fn start_level(&self, bundle: BundleId) -> Option<u32>;

    /// Whether the last persistent start asked for the activation policy.
    fn activation_policy_used(&self, bundle: BundleId) -> bool;

    /// Record the "should start" intent.
    fn set_persistently_started(&self, bundle: BundleId, started: bool, activation_policy: bool);

    /// Record the bundle's start level.
    fn set_start_level(&self, bundle: BundleId, level: u32);

    /// Forget everything stored for the bundle.
    fn remove(&self, bundle: BundleId);

    /// Forget everything.
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StoredBundle {
    started: bool,
    activation_policy: bool,
    start_level: Option<u32>,
}

/// Process-local storage backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    bundles: DashMap<BundleId, StoredBundle>,
}

impl InMemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bundles with stored state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

impl BundleStorage for InMemoryStorage {
    fn is_persistently_started(&self, bundle: BundleId) -> bool {
        self.bundles.get(&bundle).is_some_and(|b| b.started)
    }

    fn start_level(&self, bundle: BundleId) -> Option<u32> {
        self.bundles.get(&bundle).and_then(|b| b.start_level)
    }

    fn activation_policy_used(&self, bundle: BundleId) -> bool {
        self.bundles.get(&bundle).is_some_and(|b| b.activation_policy)
    }

    fn set_persistently_started(&self, bundle: BundleId, started: bool, activation_policy: bool) {
        let mut entry = self.bundles.entry(bundle).or_default();
        entry.started = started;
        entry.activation_policy = started && activation_policy;
    }

    fn set_start_level(&self, bundle: BundleId, level: u32) {
        self.bundles.entry(bundle).or_default().start_level = Some(level);
    }

    fn remove(&self, bundle: BundleId) {
        self.bundles.remove(&bundle);
    }

    fn clear(&self) {
        self.bundles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_unknown_bundle() {
        let storage = InMemoryStorage::new();
        assert!(!storage.is_persistently_started(BundleId(1)));
        assert_eq!(storage.start_level(BundleId(1)), None);
        assert!(!storage.activation_policy_used(BundleId(1)));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_started_flag_and_policy() {
        let storage = InMemoryStorage::new();
        storage.set_persistently_started(BundleId(1), true, true);
        assert!(storage.is_persistently_started(BundleId(1)));
        assert!(storage.activation_policy_used(BundleId(1)));

        storage.set_persistently_started(BundleId(1), false, true);
        assert!(!storage.is_persistently_started(BundleId(1)));
        assert!(!storage.activation_policy_used(BundleId(1)));
    }

    #[test]
    fn test_remove_and_clear() {
        let storage = InMemoryStorage::new();
        storage.set_start_level(BundleId(1), 3);
        storage.set_start_level(BundleId(2), 4);
        assert_eq!(storage.start_level(BundleId(1)), Some(3));
        assert_eq!(storage.len(), 2);

        storage.remove(BundleId(1));
        assert_eq!(storage.start_level(BundleId(1)), None);
        storage.clear();
        assert!(storage.is_empty());
    }
}
