//! Resolution: turning resolver output into wirings.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tessel_core::{BundleId, BundleState};
use tessel_events::BundleEventKind;
use tracing::{debug, warn};

use super::Framework;
use crate::collaborators::{ResolutionError, ResolveRequest};
use crate::error::{FrameworkError, FrameworkResult};
use crate::fallback::FallbackResolver;
use crate::lock::{LockContext, LockItem};
use crate::registry::RegistryState;
use crate::revision::Revision;

fn unresolved_current(state: &RegistryState, ids: &[BundleId]) -> Vec<Arc<Revision>> {
    ids.iter()
        .filter_map(|id| state.record(*id))
        .filter(|r| r.state != BundleState::Uninstalled)
        .filter_map(|r| r.current())
        .filter(|rev| !state.is_wired(rev.id()))
        .cloned()
        .collect()
}

impl Framework {
    /// Make sure a bundle's current revision is resolved.
    ///
    /// With `trigger_resolution` a failed resolution is an error; without it
    /// the failure is swallowed and `Ok(false)` returned. Without it, a
    /// caller that already holds a bundle lock also gets `Ok(false)` when
    /// the wiring lock is busy.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Resolution`] (only when
    /// `trigger_resolution` is set), lookup errors and lock timeouts.
    pub fn ensure_resolved(&self, id: BundleId, trigger_resolution: bool) -> FrameworkResult<bool> {
        if self.lookup_live(id)?.1.is_resolved() {
            return Ok(true);
        }
        let Some(_ctx) = self.wiring_lock("ensure_resolved", trigger_resolution)? else {
            debug!(bundle_id = %id, "Wiring lock busy, best-effort resolution skipped");
            return Ok(false);
        };
        if self.lookup_live(id)?.1.is_resolved() {
            return Ok(true);
        }

        match self.resolve_batch(&[id], &[]) {
            Ok(()) => Ok(true),
            Err(source) if trigger_resolution => {
                Err(FrameworkError::Resolution { bundle: id, source })
            },
            Err(source) => {
                debug!(bundle_id = %id, error = %source, "Best-effort resolution failed");
                Ok(false)
            },
        }
    }

    /// Resolve the given bundles, or every installed bundle, as one batch.
    ///
    /// Returns `true` only if every one of them ends up resolved.
    ///
    /// # Errors
    ///
    /// Returns a lock timeout if the wiring lock cannot be acquired.
    pub fn resolve_bundles(&self, ids: Option<&[BundleId]>) -> FrameworkResult<bool> {
        let _ctx = self
            .inner
            .locks
            .lock("resolve_bundles", &[LockItem::FrameworkWiring])?;
        Ok(self.resolve_bundles_locked(ids))
    }

    /// The wiring lock for resolution started from inside another operation.
    ///
    /// A thread that holds a bundle lock but not the wiring lock may be
    /// blocking a refresh that holds the wiring lock and waits for that
    /// bundle. Unless `must_wait` is set, such a thread only tries once and
    /// gets `None` when the lock is busy.
    pub(super) fn wiring_lock(
        &self,
        method: &'static str,
        must_wait: bool,
    ) -> FrameworkResult<Option<LockContext<'_>>> {
        let held = self.inner.locks.held_by_current_thread();
        let holds_bundle = held.iter().any(|item| matches!(item, LockItem::Bundle(_)));
        if !must_wait && holds_bundle && !held.contains(&LockItem::FrameworkWiring) {
            return Ok(self.inner.locks.try_lock(method, &[LockItem::FrameworkWiring]));
        }
        self.inner
            .locks
            .lock(method, &[LockItem::FrameworkWiring])
            .map(Some)
    }

    /// [`resolve_bundles`](Self::resolve_bundles) with the wiring lock held.
    pub(super) fn resolve_bundles_locked(&self, ids: Option<&[BundleId]>) -> bool {
        let targets: Vec<BundleId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self
                .inner
                .registry
                .read()
                .bundles
                .values()
                .filter(|r| r.state == BundleState::Installed)
                .map(|r| r.id)
                .collect(),
        };
        if let Err(e) = self.resolve_batch(&[], &targets) {
            warn!(error = %e, "Batch resolution failed");
        }

        let registry = self.inner.registry.read();
        targets.iter().all(|id| {
            registry
                .record(*id)
                .is_some_and(|r| r.state != BundleState::Uninstalled && r.state.is_resolved())
        })
    }

    /// Ask the resolver for wirings and install them. The caller holds the
    /// wiring lock.
    pub(super) fn resolve_batch(
        &self,
        mandatory: &[BundleId],
        optional: &[BundleId],
    ) -> Result<(), ResolutionError> {
        let request = {
            let registry = self.inner.registry.read();
            let mandatory = unresolved_current(&registry, mandatory);
            let mut optional = unresolved_current(&registry, optional);
            // Unresolved fragments ride along so they can attach to hosts
            // resolved in this batch.
            for record in registry.bundles.values() {
                if record.kind.is_fragment()
                    && record.state == BundleState::Installed
                    && let Some(current) = record.current()
                    && !registry.is_wired(current.id())
                    && !mandatory.iter().chain(&optional).any(|r| r.id() == current.id())
                {
                    optional.push(Arc::clone(current));
                }
            }

            let mut candidates = BTreeMap::new();
            for record in registry.bundles.values() {
                if record.state != BundleState::Uninstalled
                    && let Some(current) = record.current()
                {
                    candidates.insert(current.id(), Arc::clone(current));
                }
            }
            for id in registry.wirings.keys() {
                if let Some(revision) = registry.revisions.get(id) {
                    candidates.insert(*id, Arc::clone(revision));
                }
            }

            ResolveRequest {
                mandatory,
                optional,
                candidates: candidates.into_values().collect(),
                resolved: registry.wirings.keys().copied().collect::<BTreeSet<_>>(),
            }
        };
        if request.mandatory.is_empty() && request.optional.is_empty() {
            return Ok(());
        }

        let wires = self.inner.resolver.resolve(&request)?;

        let (wired, resolved_bundles) = {
            let mut registry = self.inner.registry.write();
            let created = registry.apply_wirings(wires);
            let mut wired = Vec::with_capacity(created.len());
            let mut resolved_bundles = Vec::new();
            for rev_id in created {
                let Some(revision) = registry.revisions.get(&rev_id).cloned() else {
                    continue;
                };
                if !revision.is_fragment() {
                    registry.fallbacks.insert(
                        rev_id,
                        Arc::new(FallbackResolver::new(Arc::clone(&revision))),
                    );
                }
                if let Some(record) = registry.record_mut(revision.bundle())
                    && record.state == BundleState::Installed
                    && record.current().is_some_and(|c| c.id() == rev_id)
                {
                    record.state = BundleState::Resolved;
                    resolved_bundles.push((record.id, record.symbolic_name().to_owned()));
                }
                if let Some(wiring) = registry.wirings.get(&rev_id).cloned() {
                    wired.push((revision, wiring));
                }
            }
            (wired, resolved_bundles)
        };

        for (revision, wiring) in &wired {
            self.inner.environment.wired(revision, wiring);
        }
        for (id, name) in &resolved_bundles {
            self.fire(BundleEventKind::Resolved, *id, name);
            debug!(bundle_id = %id, "Bundle resolved");
        }

        let registry = self.inner.registry.read();
        match request
            .mandatory
            .iter()
            .find(|rev| !registry.is_wired(rev.id()))
        {
            Some(missing) => Err(ResolutionError::new(
                Some(missing.id()),
                format!("resolver returned no wiring for {}", missing.symbolic_name()),
            )),
            None => Ok(()),
        }
    }
}
