//! Framework-wide refresh and the wiring-graph queries behind it.

use std::collections::BTreeSet;

use tessel_core::{BundleId, BundleState, LifecycleOptions};
use tessel_events::FrameworkEventKind;
use tessel_telemetry::OperationContext;
use tracing::info;

use super::Framework;
use crate::error::FrameworkResult;
use crate::lock::LockItem;
use crate::wiring::Namespace;

impl Framework {
    /// Refresh the given bundles, or every removal-pending bundle.
    ///
    /// Runs on the calling thread while holding the wiring lock. Every bundle
    /// in the dependency closure is refreshed; running ones are stopped first
    /// (highest start level first) and restarted afterwards (lowest first).
    /// Uninstalled bundles are removed for good. Per-bundle failures are
    /// reported as framework error events; a "packages refreshed" event
    /// closes the batch.
    ///
    /// # Errors
    ///
    /// Returns a lock timeout if the wiring lock cannot be acquired.
    pub fn refresh_bundles(&self, ids: Option<&[BundleId]>) -> FrameworkResult<()> {
        let _op = OperationContext::new("framework")
            .with_operation("refresh_bundles")
            .enter();
        let ctx = self
            .inner
            .locks
            .lock("refresh_bundles", &[LockItem::FrameworkWiring])?;

        let initial: Vec<BundleId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self.removal_pending_bundles().into_iter().collect(),
        };
        let closure = self.dependency_closure(&initial);

        let mut running = Vec::new();
        let mut uninstalled = Vec::new();
        for id in closure.iter().filter(|id| !id.is_system()) {
            match self.state(*id) {
                Some(BundleState::Starting | BundleState::Active) => {
                    running.push((self.bundle_start_level(*id), *id));
                },
                Some(BundleState::Uninstalled) => uninstalled.push(*id),
                _ => {},
            }
        }
        running.sort_unstable();

        for (_, id) in running.iter().rev() {
            if let Err(err) = self.stop(*id, LifecycleOptions::TRANSIENT) {
                self.report(Some(*id), &err);
            }
        }

        for id in &uninstalled {
            self.remove_uninstalled(*id);
        }

        for id in closure.iter().filter(|id| !id.is_system()) {
            if uninstalled.contains(id) || !self.inner.registry.contains(*id) {
                continue;
            }
            if let Err(err) = self.refresh_bundle(*id) {
                self.report(Some(*id), &err);
            }
        }

        for (_, id) in &running {
            if uninstalled.contains(id) || !self.inner.registry.contains(*id) {
                continue;
            }
            let options = if self.inner.storage.activation_policy_used(*id) {
                LifecycleOptions::TRANSIENT | LifecycleOptions::ACTIVATION_POLICY
            } else {
                LifecycleOptions::TRANSIENT
            };
            if let Err(err) = self.start(*id, options) {
                self.report(Some(*id), &err);
            }
        }

        ctx.unlock();
        self.fire_framework(FrameworkEventKind::PackagesRefreshed);
        info!(
            refreshed = closure.len(),
            restarted = running.len(),
            removed = uninstalled.len(),
            "Packages refreshed"
        );
        Ok(())
    }

    /// Every bundle reachable from `ids` through dependent wires.
    ///
    /// Follows each revision's provided wires to the requiring bundles, and
    /// from each fragment to the hosts it is attached to.
    #[must_use]
    pub fn dependency_closure(&self, ids: &[BundleId]) -> BTreeSet<BundleId> {
        let registry = self.inner.registry.read();
        let mut closure = BTreeSet::new();
        let mut pending: Vec<BundleId> = ids
            .iter()
            .copied()
            .filter(|id| registry.record(*id).is_some())
            .collect();

        while let Some(id) = pending.pop() {
            if !closure.insert(id) {
                continue;
            }
            let Some(record) = registry.record(id) else {
                continue;
            };
            for revision in &record.revisions {
                if let Some(wiring) = registry.wirings.get(&revision.id()) {
                    for wire in wiring.provided() {
                        if let Some(requirer) = registry.revisions.get(&wire.requirer) {
                            pending.push(requirer.bundle());
                        }
                    }
                    for wire in wiring.required() {
                        if wire.capability.namespace == Namespace::Host
                            && let Some(host) = registry.revisions.get(&wire.provider)
                        {
                            pending.push(host.bundle());
                        }
                    }
                }
                for host in registry.attachments.hosts_of(revision.id()) {
                    if let Some(host) = registry.revisions.get(&host) {
                        pending.push(host.bundle());
                    }
                }
            }
        }
        closure
    }

    /// Bundles holding a wiring that is no longer current: a superseded
    /// revision that is still wired, or any wiring of an uninstalled bundle.
    #[must_use]
    pub fn removal_pending_bundles(&self) -> BTreeSet<BundleId> {
        let registry = self.inner.registry.read();
        registry
            .bundles
            .values()
            .filter(|record| {
                let current = record.current().map(|r| r.id());
                record.revisions.iter().any(|rev| {
                    registry.is_wired(rev.id())
                        && (record.state == BundleState::Uninstalled || Some(rev.id()) != current)
                })
            })
            .map(|record| record.id)
            .collect()
    }
}
