//! Class and resource lookup through a bundle's class space.
//!
//! Delegation order for a resolved bundle: system packages, the static
//! package wire (authoritative when present), bundle-wide wires, the
//! bundle's own content followed by its attached fragments, and finally
//! the dynamic-import fallback.

use std::sync::Arc;

use tessel_core::{BundleId, BundleState, RevisionId};
use tracing::{debug, trace};

use super::Framework;
use crate::error::{FrameworkError, FrameworkResult};
use crate::fallback::{FallbackEnv, FallbackResolver, LoadContext};
use crate::fragment::{host_search_order, localization_order};
use crate::lock::LockItem;
use crate::package::{class_package, class_path, normalize_path, resource_package};
use crate::revision::Revision;
use crate::wiring::Namespace;

/// An entry served from some bundle's class space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Normalized entry path.
    pub path: String,
    /// The bundle on whose behalf the entry was served.
    pub bundle: BundleId,
    /// The revision whose content held the entry. For fragment-provided
    /// entries this is the fragment revision.
    pub revision: RevisionId,
    /// Entry bytes.
    pub data: Vec<u8>,
}

/// Where a lookup may look, captured under one registry read.
struct SearchPlan {
    static_wire: Option<(BundleId, Vec<Arc<Revision>>)>,
    bundle_wires: Vec<(BundleId, Vec<Arc<Revision>>)>,
    own: Vec<Arc<Revision>>,
    fallback: Option<Arc<FallbackResolver>>,
}

fn search_content(order: &[Arc<Revision>], path: &str, owner: BundleId) -> Option<Resource> {
    let path = normalize_path(path);
    order.iter().find_map(|revision| {
        revision.content().entry(path).map(|data| Resource {
            path: path.to_owned(),
            bundle: owner,
            revision: revision.id(),
            data,
        })
    })
}

impl Framework {
    /// Load the class `class_name` (`a.b.C`) through a bundle's class space.
    ///
    /// Resolves the bundle on demand. Loading a class served by a bundle
    /// that is waiting for lazy activation completes its activation; a
    /// failure there is reported as a framework error event and the class
    /// is still returned.
    ///
    /// # Errors
    ///
    /// Fails for unknown, uninstalled and fragment bundles. Returns
    /// `Ok(None)` when the class is not found or the bundle cannot be
    /// resolved.
    pub fn load_class(&self, id: BundleId, class_name: &str) -> FrameworkResult<Option<Resource>> {
        let path = class_path(class_name);
        let mut ctx = LoadContext::new();
        let found = self.load(id, &path, class_package(class_name), &mut ctx)?;
        if let Some(resource) = &found {
            self.complete_lazy_activation(resource.bundle);
        }
        Ok(found)
    }

    /// Look up the resource at `path` (`a/b/x.txt`) through a bundle's class
    /// space.
    ///
    /// # Errors
    ///
    /// As for [`load_class`](Self::load_class).
    pub fn get_resource(&self, id: BundleId, path: &str) -> FrameworkResult<Option<Resource>> {
        let mut ctx = LoadContext::new();
        self.load(id, path, &resource_package(path), &mut ctx)
    }

    /// Look up a localization entry.
    ///
    /// A host searches its own content and then its fragments. A resolved
    /// fragment searches its highest-version host first and its own content
    /// last. Never triggers resolution.
    ///
    /// # Errors
    ///
    /// Fails for unknown and uninstalled bundles.
    pub fn get_localization_entry(&self, id: BundleId, path: &str) -> FrameworkResult<Option<Resource>> {
        self.lookup_live(id)?;
        let order = {
            let registry = self.inner.registry.read();
            let Some(revision) = registry.current(id) else {
                return Ok(None);
            };
            localization_order(&registry, &revision)
        };
        Ok(search_content(&order, path, id))
    }

    fn load(
        &self,
        id: BundleId,
        path: &str,
        package: &str,
        ctx: &mut LoadContext,
    ) -> FrameworkResult<Option<Resource>> {
        let (kind, _) = self.lookup_live(id)?;
        if kind.is_fragment() {
            return Err(FrameworkError::Unsupported {
                operation: "load",
                reason: format!("bundle {id} is a fragment and has no class space"),
            });
        }
        if !self.ensure_resolved(id, false)? {
            debug!(bundle_id = %id, path, "Lookup on unresolvable bundle");
            return Ok(None);
        }
        let revision = self
            .current_revision(id)
            .ok_or(FrameworkError::BundleNotFound(id))?;
        Ok(self.find_entry(&revision, path, package, ctx))
    }

    fn plan(&self, revision: &Arc<Revision>, package: &str) -> SearchPlan {
        let registry = self.inner.registry.read();
        let wiring = registry.wirings.get(&revision.id());

        let static_wire = wiring
            .and_then(|w| w.package_provider(package))
            .and_then(|provider| registry.revisions.get(&provider))
            .map(|provider| (provider.bundle(), host_search_order(&registry, provider)));

        let bundle_wires = wiring
            .map(|w| {
                w.required()
                    .iter()
                    .filter(|wire| wire.capability.namespace == Namespace::Bundle)
                    .filter_map(|wire| registry.revisions.get(&wire.provider))
                    .filter(|provider| provider.exports(package))
                    .map(|provider| (provider.bundle(), host_search_order(&registry, provider)))
                    .collect()
            })
            .unwrap_or_default();

        SearchPlan {
            static_wire,
            bundle_wires,
            own: host_search_order(&registry, revision),
            fallback: registry.fallbacks.get(&revision.id()).cloned(),
        }
    }

    /// Full delegation for one revision. No registry lock is held while
    /// content is read or the fallback runs.
    fn find_entry(
        &self,
        revision: &Arc<Revision>,
        path: &str,
        package: &str,
        ctx: &mut LoadContext,
    ) -> Option<Resource> {
        if !revision.bundle().is_system()
            && self.system_covers(package)
            && let Some(found) = self.system_entry(path)
        {
            return Some(found);
        }

        let plan = self.plan(revision, package);
        if let Some((owner, order)) = &plan.static_wire {
            return search_content(order, path, *owner);
        }
        for (owner, order) in &plan.bundle_wires {
            if let Some(found) = search_content(order, path, *owner) {
                return Some(found);
            }
        }
        if let Some(found) = search_content(&plan.own, path, revision.bundle()) {
            return Some(found);
        }
        plan.fallback?.find(self, path, package, ctx)
    }

    /// Run the activator of a bundle waiting for lazy activation.
    fn complete_lazy_activation(&self, id: BundleId) {
        if !self.is_lazy_pending(id) {
            return;
        }
        let result = self
            .inner
            .locks
            .lock("lazy_activation", &[LockItem::Bundle(id)])
            .and_then(|_ctx| {
                if !self.is_lazy_pending(id) {
                    return Ok(());
                }
                let revision = self
                    .current_revision(id)
                    .ok_or(FrameworkError::BundleNotFound(id))?;
                debug!(bundle_id = %id, "Completing lazy activation");
                self.activate(id, &revision)
            });
        if let Err(err) = result {
            self.report(Some(id), &err);
        }
    }

    fn is_lazy_pending(&self, id: BundleId) -> bool {
        self.inner
            .registry
            .read()
            .record(id)
            .is_some_and(|r| r.state == BundleState::Starting && r.lazy_pending)
    }
}

impl FallbackEnv for Framework {
    fn resolved_candidates(&self) -> Vec<Arc<Revision>> {
        let registry = self.inner.registry.read();
        registry
            .bundles
            .values()
            .filter(|r| {
                !r.id.is_system()
                    && !r.kind.is_fragment()
                    && r.state != BundleState::Uninstalled
                    && r.state.is_resolved()
            })
            .filter_map(|r| r.current())
            .filter(|rev| registry.is_wired(rev.id()))
            .cloned()
            .collect()
    }

    fn is_resolved(&self, revision: RevisionId) -> bool {
        self.inner.registry.read().is_wired(revision)
    }

    fn search_candidate(
        &self,
        candidate: &Arc<Revision>,
        path: &str,
        ctx: &mut LoadContext,
    ) -> Option<Resource> {
        trace!(candidate = %candidate.id(), path, "Searching dynamic import candidate");
        self.find_entry(candidate, path, &resource_package(path), ctx)
    }

    fn resolve_installed(&self) {
        match self.wiring_lock("resolve_installed", false) {
            Ok(Some(_ctx)) => {
                self.resolve_bundles_locked(None);
            },
            Ok(None) => debug!("Wiring lock busy, dynamic import skips installed bundles"),
            Err(e) => debug!(error = %e, "Resolution during dynamic import skipped"),
        }
    }

    fn system_covers(&self, package: &str) -> bool {
        self.inner.settings.is_system_package(package)
    }

    fn system_entry(&self, path: &str) -> Option<Resource> {
        let system = self.current_revision(BundleId::SYSTEM)?;
        search_content(&[system], path, BundleId::SYSTEM)
    }
}
