//! The shared table of bundles, revisions and wirings.
//!
//! Revisions, wirings and attachments are all addressed by id. The registry
//! owns every [`Revision`] through an `Arc`; nothing else holds a reference
//! back into it.
//!
//! The registry lock is held only for bookkeeping. It is always released
//! before events fire or any collaborator (activator, resolver,
//! environment) is called.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tessel_core::{BundleId, BundleKind, BundleState, RevisionId, Version};
use tracing::debug;

use crate::collaborators::{Activator, BundleContext};
use crate::fallback::FallbackResolver;
use crate::fragment::Attachments;
use crate::revision::Revision;
use crate::wiring::{Namespace, Wire, Wiring};

/// A snapshot of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleInfo {
    /// Bundle id.
    pub id: BundleId,
    /// Install location.
    pub location: String,
    /// Symbolic name of the current revision.
    pub symbolic_name: String,
    /// Version of the current revision.
    pub version: Version,
    /// Bundle kind.
    pub kind: BundleKind,
    /// Lifecycle state.
    pub state: BundleState,
    /// Current revision, if the bundle still has one.
    pub current_revision: Option<RevisionId>,
    /// All revisions, newest first.
    pub revisions: Vec<RevisionId>,
}

/// A running activation: the activator instance and its context.
pub(crate) struct Activation {
    pub(crate) activator: Option<Arc<dyn Activator>>,
    pub(crate) context: Arc<BundleContext>,
}

pub(crate) struct BundleRecord {
    pub(crate) id: BundleId,
    pub(crate) location: String,
    pub(crate) kind: BundleKind,
    pub(crate) state: BundleState,
    /// Newest first. The first entry is the current revision.
    pub(crate) revisions: Vec<Arc<Revision>>,
    pub(crate) activation: Option<Activation>,
    /// Started with the activation policy; waiting for its first class load.
    pub(crate) lazy_pending: bool,
}

impl BundleRecord {
    pub(crate) fn new(id: BundleId, location: String, revision: Arc<Revision>) -> Self {
        Self {
            id,
            location,
            kind: revision.kind(),
            state: BundleState::Installed,
            revisions: vec![revision],
            activation: None,
            lazy_pending: false,
        }
    }

    pub(crate) fn current(&self) -> Option<&Arc<Revision>> {
        self.revisions.first()
    }

    pub(crate) fn symbolic_name(&self) -> &str {
        self.current().map_or("", |r| r.symbolic_name())
    }

    fn info(&self) -> BundleInfo {
        let current = self.current();
        BundleInfo {
            id: self.id,
            location: self.location.clone(),
            symbolic_name: self.symbolic_name().to_owned(),
            version: current.map_or(Version::EMPTY, |r| r.version()),
            kind: self.kind,
            state: self.state,
            current_revision: current.map(|r| r.id()),
            revisions: self.revisions.iter().map(|r| r.id()).collect(),
        }
    }
}

pub(crate) struct RegistryState {
    pub(crate) bundles: BTreeMap<BundleId, BundleRecord>,
    pub(crate) revisions: HashMap<RevisionId, Arc<Revision>>,
    pub(crate) wirings: HashMap<RevisionId, Wiring>,
    pub(crate) attachments: Attachments,
    pub(crate) fallbacks: HashMap<RevisionId, Arc<FallbackResolver>>,
    pub(crate) locations: HashMap<String, BundleId>,
    next_bundle: u64,
    next_revision: u64,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            bundles: BTreeMap::new(),
            revisions: HashMap::new(),
            wirings: HashMap::new(),
            attachments: Attachments::default(),
            fallbacks: HashMap::new(),
            locations: HashMap::new(),
            next_bundle: 0,
            next_revision: 0,
        }
    }

    pub(crate) fn next_bundle_id(&mut self) -> BundleId {
        let id = BundleId(self.next_bundle);
        self.next_bundle = self.next_bundle.saturating_add(1);
        id
    }

    pub(crate) fn next_revision_id(&mut self) -> RevisionId {
        let id = RevisionId(self.next_revision);
        self.next_revision = self.next_revision.saturating_add(1);
        id
    }

    pub(crate) fn record(&self, id: BundleId) -> Option<&BundleRecord> {
        self.bundles.get(&id)
    }

    pub(crate) fn record_mut(&mut self, id: BundleId) -> Option<&mut BundleRecord> {
        self.bundles.get_mut(&id)
    }

    pub(crate) fn current(&self, id: BundleId) -> Option<Arc<Revision>> {
        self.record(id).and_then(|r| r.current().cloned())
    }

    pub(crate) fn state_of(&self, id: BundleId) -> Option<BundleState> {
        self.record(id).map(|r| r.state)
    }

    /// Whether the revision has a wiring.
    pub(crate) fn is_wired(&self, revision: RevisionId) -> bool {
        self.wirings.contains_key(&revision)
    }

    /// Register a freshly created revision as the bundle's current one.
    pub(crate) fn push_revision(&mut self, revision: Arc<Revision>) {
        self.revisions.insert(revision.id(), Arc::clone(&revision));
        if let Some(record) = self.bundles.get_mut(&revision.bundle()) {
            record.kind = revision.kind();
            record.revisions.insert(0, revision);
        }
    }

    /// Find a live bundle with this symbolic name and version.
    pub(crate) fn find_symbolic(&self, name: &str, version: Version) -> Option<BundleId> {
        self.bundles
            .values()
            .filter(|r| r.state != BundleState::Uninstalled)
            .find(|r| {
                r.current()
                    .is_some_and(|c| c.symbolic_name() == name && c.version() == version)
            })
            .map(|r| r.id)
    }

    /// Whether a revision's wiring is still needed by someone else.
    ///
    /// True while another wired revision depends on it, or while a fragment
    /// revision is still attached to a host.
    pub(crate) fn is_in_use(&self, revision: RevisionId) -> bool {
        let Some(wiring) = self.wirings.get(&revision) else {
            return false;
        };
        let provided = wiring.provided().iter().any(|w| {
            w.requirer != revision
                && w.capability.namespace != Namespace::Host
                && self.wirings.contains_key(&w.requirer)
        });
        provided || !self.attachments.hosts_of(revision).is_empty()
    }

    /// Install wirings returned by the resolver.
    ///
    /// Returns the revisions that received a new wiring. Revisions that are
    /// already wired or no longer registered are skipped.
    pub(crate) fn apply_wirings(
        &mut self,
        resolved: BTreeMap<RevisionId, Vec<Wire>>,
    ) -> Vec<RevisionId> {
        let mut created = Vec::new();
        for (revision, wires) in resolved {
            if self.wirings.contains_key(&revision) || !self.revisions.contains_key(&revision) {
                continue;
            }
            self.wirings.insert(revision, Wiring::new(revision, wires));
            created.push(revision);
        }

        // Providers may themselves be new, so provided wires are added only
        // once every new wiring exists.
        for revision in &created {
            let required: Vec<Wire> = self
                .wirings
                .get(revision)
                .map(|w| w.required().to_vec())
                .unwrap_or_default();
            for wire in required {
                if wire.capability.namespace == Namespace::Host
                    && let Some(fragment) = self.revisions.get(&wire.requirer).cloned()
                {
                    self.attachments.attach(&fragment, wire.provider);
                }
                if let Some(provider) = self.wirings.get_mut(&wire.provider) {
                    provider.add_provided(wire);
                }
            }
        }
        created
    }

    /// Remove a revision's wiring, both directions of its wires and its
    /// fragment attachments.
    pub(crate) fn drop_wiring(&mut self, revision: RevisionId) -> Option<Wiring> {
        let wiring = self.wirings.remove(&revision)?;
        for wire in wiring.required() {
            if let Some(provider) = self.wirings.get_mut(&wire.provider) {
                provider.forget_requirer(revision);
            }
        }
        for wire in wiring.provided() {
            if let Some(requirer) = self.wirings.get_mut(&wire.requirer) {
                requirer.forget_provider(revision);
            }
        }
        self.attachments.detach_host(revision);
        self.attachments.detach_fragment(revision);
        debug!(revision = %revision, "Dropped wiring");
        Some(wiring)
    }

    /// Remove a revision from the registry entirely.
    ///
    /// The caller must notify the environment and close the content once the
    /// lock is released.
    pub(crate) fn dispose_revision(&mut self, revision: RevisionId) -> Option<Arc<Revision>> {
        self.drop_wiring(revision);
        self.fallbacks.remove(&revision);
        let removed = self.revisions.remove(&revision)?;
        if let Some(record) = self.bundles.get_mut(&removed.bundle()) {
            record.revisions.retain(|r| r.id() != revision);
        }
        debug!(bundle_id = %removed.bundle(), revision = %revision, "Disposed revision");
        Some(removed)
    }

    /// Disable the dynamic-import fallback of a revision.
    pub(crate) fn disable_fallback(&self, revision: RevisionId) {
        if let Some(fallback) = self.fallbacks.get(&revision) {
            fallback.disable();
        }
    }

    pub(crate) fn info(&self, id: BundleId) -> Option<BundleInfo> {
        self.record(id).map(BundleRecord::info)
    }
}

/// The shared bundle table.
pub struct BundleRegistry {
    state: RwLock<RegistryState>,
}

impl BundleRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::new()),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of one bundle.
    #[must_use]
    pub fn bundle(&self, id: BundleId) -> Option<BundleInfo> {
        self.read().info(id)
    }

    /// Snapshots of every registered bundle, by id. Includes zombies.
    #[must_use]
    pub fn bundles(&self) -> Vec<BundleInfo> {
        self.read().bundles.values().map(BundleRecord::info).collect()
    }

    /// A bundle's lifecycle state.
    #[must_use]
    pub fn state(&self, id: BundleId) -> Option<BundleState> {
        self.read().state_of(id)
    }

    /// A bundle's current revision.
    #[must_use]
    pub fn current_revision(&self, id: BundleId) -> Option<Arc<Revision>> {
        self.read().current(id)
    }

    /// A revision by id, while it is registered.
    #[must_use]
    pub fn revision(&self, id: RevisionId) -> Option<Arc<Revision>> {
        self.read().revisions.get(&id).cloned()
    }

    /// A revision's wiring, if it is resolved.
    #[must_use]
    pub fn wiring(&self, id: RevisionId) -> Option<Wiring> {
        self.read().wirings.get(&id).cloned()
    }

    /// Fragments attached to a host revision, by owning bundle id.
    #[must_use]
    pub fn fragments_of(&self, host: RevisionId) -> Vec<RevisionId> {
        self.read().attachments.fragments_of(host)
    }

    /// Hosts a fragment revision is attached to.
    #[must_use]
    pub fn hosts_of(&self, fragment: RevisionId) -> Vec<RevisionId> {
        self.read().attachments.hosts_of(fragment)
    }

    /// Whether a bundle is registered, including zombies.
    #[must_use]
    pub fn contains(&self, id: BundleId) -> bool {
        self.read().bundles.contains_key(&id)
    }
}

impl std::fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("BundleRegistry")
            .field("bundles", &state.bundles.len())
            .field("revisions", &state.revisions.len())
            .field("wirings", &state.wirings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::VersionRange;

    use crate::revision::{EmptyContent, RevisionDescriptor};
    use crate::wiring::{Capability, Requirement};

    fn add_bundle(state: &mut RegistryState, name: &str, kind: BundleKind) -> Arc<Revision> {
        let bundle = state.next_bundle_id();
        let rev_id = state.next_revision_id();
        let revision = Arc::new(Revision::new(
            rev_id,
            bundle,
            RevisionDescriptor {
                symbolic_name: name.into(),
                version: Version::new(1, 0, 0),
                kind,
                capabilities: vec![Capability::package(name, Version::new(1, 0, 0))],
                requirements: Vec::new(),
                dynamic_imports: Vec::new(),
                activator: None,
                lazy_activation: false,
                content: Arc::new(EmptyContent),
            },
        ));
        state.revisions.insert(rev_id, Arc::clone(&revision));
        state
            .bundles
            .insert(bundle, BundleRecord::new(bundle, name.into(), Arc::clone(&revision)));
        revision
    }

    fn wire(provider: &Revision, requirer: &Revision, ns: Namespace) -> Wire {
        Wire {
            provider: provider.id(),
            requirer: requirer.id(),
            capability: Capability::new(ns, provider.symbolic_name(), Version::new(1, 0, 0)),
            requirement: Requirement::new(ns, provider.symbolic_name(), VersionRange::ANY),
        }
    }

    #[test]
    fn test_apply_wirings_links_both_directions() {
        let mut state = RegistryState::new();
        let a = add_bundle(&mut state, "a", BundleKind::Host);
        let b = add_bundle(&mut state, "b", BundleKind::Host);

        let mut resolved = BTreeMap::new();
        resolved.insert(a.id(), vec![wire(&b, &a, Namespace::Package)]);
        resolved.insert(b.id(), Vec::new());
        let created = state.apply_wirings(resolved);

        assert_eq!(created.len(), 2);
        assert_eq!(state.wirings[&b.id()].provided().len(), 1);
        assert!(state.is_in_use(b.id()));
        assert!(!state.is_in_use(a.id()));
    }

    #[test]
    fn test_already_wired_revision_is_not_rewired() {
        let mut state = RegistryState::new();
        let a = add_bundle(&mut state, "a", BundleKind::Host);
        let b = add_bundle(&mut state, "b", BundleKind::Host);
        state.apply_wirings(BTreeMap::from([(a.id(), Vec::new())]));

        let created = state.apply_wirings(BTreeMap::from([
            (a.id(), vec![wire(&b, &a, Namespace::Package)]),
            (b.id(), Vec::new()),
        ]));
        assert_eq!(created, vec![b.id()]);
        assert!(state.wirings[&a.id()].required().is_empty());
    }

    #[test]
    fn test_host_wires_attach_fragments() {
        let mut state = RegistryState::new();
        let host = add_bundle(&mut state, "h", BundleKind::Host);
        let frag = add_bundle(&mut state, "f", BundleKind::Fragment);

        state.apply_wirings(BTreeMap::from([
            (host.id(), Vec::new()),
            (frag.id(), vec![wire(&host, &frag, Namespace::Host)]),
        ]));

        assert_eq!(state.attachments.fragments_of(host.id()), vec![frag.id()]);
        assert_eq!(state.attachments.hosts_of(frag.id()), vec![host.id()]);
        assert!(state.is_in_use(frag.id()));
        // Host wires alone do not keep a host in use.
        assert!(!state.is_in_use(host.id()));
    }

    #[test]
    fn test_dispose_cleans_wires_and_attachments() {
        let mut state = RegistryState::new();
        let a = add_bundle(&mut state, "a", BundleKind::Host);
        let b = add_bundle(&mut state, "b", BundleKind::Host);
        state.apply_wirings(BTreeMap::from([
            (a.id(), vec![wire(&b, &a, Namespace::Package)]),
            (b.id(), Vec::new()),
        ]));

        let removed = state.dispose_revision(a.id()).unwrap();
        assert_eq!(removed.id(), a.id());
        assert!(state.wirings[&b.id()].provided().is_empty());
        assert!(state.bundles[&a.bundle()].revisions.is_empty());
        assert!(!state.is_in_use(b.id()));
    }

    #[test]
    fn test_find_symbolic_skips_uninstalled() {
        let mut state = RegistryState::new();
        let a = add_bundle(&mut state, "a", BundleKind::Host);
        assert_eq!(state.find_symbolic("a", Version::new(1, 0, 0)), Some(a.bundle()));
        state.record_mut(a.bundle()).unwrap().state = BundleState::Uninstalled;
        assert_eq!(state.find_symbolic("a", Version::new(1, 0, 0)), None);
    }

    #[test]
    fn test_bundle_info_snapshot() {
        let registry = BundleRegistry::new();
        let a = {
            let mut state = registry.write();
            add_bundle(&mut state, "a", BundleKind::Host)
        };
        let info = registry.bundle(a.bundle()).unwrap();
        assert_eq!(info.symbolic_name, "a");
        assert_eq!(info.state, BundleState::Installed);
        assert_eq!(info.current_revision, Some(a.id()));
        assert_eq!(registry.bundles().len(), 1);
        assert!(registry.wiring(a.id()).is_none());
    }
}
