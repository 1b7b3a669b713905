//! Install, start, stop, update, uninstall and single-bundle refresh.

use std::sync::Arc;

use tessel_core::{BundleId, BundleState, LifecycleOptions};
use tessel_events::BundleEventKind;
use tracing::{debug, info, warn};

use super::Framework;
use crate::collaborators::{Activator, BundleContext};
use crate::error::{FrameworkError, FrameworkResult};
use crate::lock::LockItem;
use crate::registry::{Activation, BundleRecord};
use crate::revision::Revision;

impl Framework {
    /// Install the bundle at `location`.
    ///
    /// `input` is passed to the deployment provider; `None` makes it read
    /// `location` itself. Installing a location that is already installed
    /// returns the existing bundle.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Deployment`] if no revision can be built and
    /// [`FrameworkError::DuplicateBundle`] if another bundle already has the
    /// same symbolic name and version.
    pub fn install(&self, location: &str, input: Option<&[u8]>) -> FrameworkResult<BundleId> {
        if let Some(existing) = self.inner.registry.read().locations.get(location) {
            return Ok(*existing);
        }

        let descriptor = self
            .inner
            .deployment
            .create_revision(location, input)
            .map_err(|source| FrameworkError::Deployment {
                location: location.to_owned(),
                source,
            })?;

        let revision = {
            let mut registry = self.inner.registry.write();
            if let Some(existing) = registry.locations.get(location) {
                let existing = *existing;
                drop(registry);
                descriptor.content.close();
                return Ok(existing);
            }
            if let Some(existing) =
                registry.find_symbolic(&descriptor.symbolic_name, descriptor.version)
            {
                drop(registry);
                descriptor.content.close();
                return Err(FrameworkError::DuplicateBundle {
                    symbolic_name: descriptor.symbolic_name,
                    version: descriptor.version,
                    existing,
                });
            }
            let id = registry.next_bundle_id();
            let rev_id = registry.next_revision_id();
            let revision = Arc::new(Revision::new(rev_id, id, descriptor));
            registry.revisions.insert(rev_id, Arc::clone(&revision));
            registry.bundles.insert(
                id,
                BundleRecord::new(id, location.to_owned(), Arc::clone(&revision)),
            );
            registry.locations.insert(location.to_owned(), id);
            revision
        };

        let id = revision.bundle();
        self.inner
            .storage
            .set_start_level(id, self.inner.settings.initial_bundle_start_level);
        self.inner.environment.install(&revision);
        self.fire(BundleEventKind::Installed, id, revision.symbolic_name());
        info!(
            bundle_id = %id,
            symbolic_name = revision.symbolic_name(),
            version = %revision.version(),
            location,
            "Bundle installed"
        );
        Ok(id)
    }

    /// Start a bundle.
    ///
    /// Without [`LifecycleOptions::TRANSIENT`] the "should start" intent is
    /// persisted first. With [`LifecycleOptions::ACTIVATION_POLICY`] a bundle
    /// that declares lazy activation waits in `STARTING` for its first class
    /// load instead of running its activator now.
    ///
    /// # Errors
    ///
    /// Fails for the system bundle and fragments, unknown or uninstalled
    /// bundles, resolution failures, lock timeouts and activator failures.
    /// On an activator failure the bundle is left `RESOLVED`.
    pub fn start(&self, id: BundleId, options: LifecycleOptions) -> FrameworkResult<()> {
        Self::reject_system("start", id)?;
        let (kind, state) = self.lookup(id)?;
        if kind.is_fragment() {
            return Err(FrameworkError::Unsupported {
                operation: "start",
                reason: format!("bundle {id} is a fragment"),
            });
        }
        if state == BundleState::Uninstalled {
            return Err(FrameworkError::AlreadyUninstalled(id));
        }

        let mut items = vec![LockItem::Bundle(id)];
        if !state.is_resolved() {
            items.push(LockItem::FrameworkWiring);
        }
        let _ctx = self.inner.locks.lock("start", &items)?;
        self.start_locked(id, options)
    }

    /// Start with the bundle lock already held.
    pub(super) fn start_locked(&self, id: BundleId, options: LifecycleOptions) -> FrameworkResult<()> {
        let (state, lazy_pending) = {
            let registry = self.inner.registry.read();
            let record = registry.record(id).ok_or(FrameworkError::BundleNotFound(id))?;
            (record.state, record.lazy_pending)
        };
        if state == BundleState::Uninstalled {
            return Err(FrameworkError::AlreadyUninstalled(id));
        }

        if !options.is_transient() {
            self.inner
                .storage
                .set_persistently_started(id, true, options.uses_activation_policy());
        }

        let bundle_level = self.bundle_start_level(id);
        let framework_level = self.start_level();
        if bundle_level > framework_level {
            if options.is_transient() {
                return Err(FrameworkError::IllegalState(format!(
                    "bundle {id} has start level {bundle_level}, above the framework start level {framework_level}"
                )));
            }
            debug!(bundle_id = %id, bundle_level, framework_level, "Start deferred until start level is reached");
            return Ok(());
        }

        match state {
            BundleState::Active => return Ok(()),
            BundleState::Starting if !lazy_pending || options.uses_activation_policy() => {
                return Ok(());
            },
            BundleState::Stopping => {
                return Err(FrameworkError::IllegalState(format!(
                    "bundle {id} is stopping"
                )));
            },
            _ => {},
        }

        self.ensure_resolved(id, true)?;
        let revision = self
            .current_revision(id)
            .ok_or(FrameworkError::BundleNotFound(id))?;

        if options.uses_activation_policy() && revision.lazy_activation() {
            let name = {
                let mut registry = self.inner.registry.write();
                let record = registry
                    .record_mut(id)
                    .ok_or(FrameworkError::BundleNotFound(id))?;
                record.state = BundleState::Starting;
                record.lazy_pending = true;
                record.symbolic_name().to_owned()
            };
            self.fire(BundleEventKind::LazyActivation, id, &name);
            debug!(bundle_id = %id, "Bundle waiting for lazy activation");
            return Ok(());
        }

        self.activate(id, &revision)
    }

    /// Run the activator and move the bundle to `ACTIVE`.
    pub(super) fn activate(&self, id: BundleId, revision: &Arc<Revision>) -> FrameworkResult<()> {
        let name = {
            let mut registry = self.inner.registry.write();
            let record = registry
                .record_mut(id)
                .ok_or(FrameworkError::BundleNotFound(id))?;
            record.state = BundleState::Starting;
            record.lazy_pending = false;
            record.symbolic_name().to_owned()
        };
        self.fire(BundleEventKind::Starting, id, &name);

        let activator = match revision.activator() {
            None => None,
            Some(declared) => match self.inner.activators.create(revision) {
                Ok(Some(activator)) => Some(activator),
                Ok(None) => {
                    return self.reject_activator(id, &name, declared, "no activator with this name");
                },
                Err(e) => return self.reject_activator(id, &name, declared, &e.message),
            },
        };
        self.run_activator(id, revision, &name, activator)
    }

    fn reject_activator(
        &self,
        id: BundleId,
        name: &str,
        declared: &str,
        reason: &str,
    ) -> FrameworkResult<()> {
        warn!(bundle_id = %id, activator = declared, reason, "Activator could not be created");
        self.unwind(id, name);
        Err(FrameworkError::InvalidActivator {
            bundle: id,
            activator: declared.to_owned(),
            reason: reason.to_owned(),
        })
    }

    fn run_activator(
        &self,
        id: BundleId,
        revision: &Revision,
        name: &str,
        activator: Option<Arc<dyn Activator>>,
    ) -> FrameworkResult<()> {
        let context = Arc::new(BundleContext::new(revision, Arc::downgrade(&self.inner)));
        if let Some(record) = self.inner.registry.write().record_mut(id) {
            record.activation = Some(Activation {
                activator: activator.clone(),
                context: Arc::clone(&context),
            });
        }

        if let Some(activator) = &activator
            && let Err(source) = activator.start(&context)
        {
            warn!(bundle_id = %id, error = %source, "Activator start failed");
            self.unwind(id, name);
            return Err(FrameworkError::ActivatorFailed { bundle: id, source });
        }

        let uninstalled = {
            let mut registry = self.inner.registry.write();
            match registry.record_mut(id) {
                Some(record) if record.state != BundleState::Uninstalled => {
                    record.state = BundleState::Active;
                    false
                },
                _ => true,
            }
        };
        if uninstalled {
            context.release();
            return Err(FrameworkError::UninstalledDuringStart(id));
        }

        self.fire(BundleEventKind::Started, id, name);
        info!(bundle_id = %id, symbolic_name = name, "Bundle started");
        Ok(())
    }

    /// Undo a failed start: `STOPPING`, release the context, `RESOLVED`.
    fn unwind(&self, id: BundleId, name: &str) {
        let activation = {
            let mut registry = self.inner.registry.write();
            registry.record_mut(id).and_then(|record| {
                if record.state != BundleState::Uninstalled {
                    record.state = BundleState::Stopping;
                }
                record.activation.take()
            })
        };
        self.fire(BundleEventKind::Stopping, id, name);
        if let Some(activation) = activation {
            activation.context.release();
        }
        if let Some(record) = self.inner.registry.write().record_mut(id)
            && record.state != BundleState::Uninstalled
        {
            record.state = BundleState::Resolved;
        }
        self.fire(BundleEventKind::Stopped, id, name);
        debug!(bundle_id = %id, "Failed start unwound");
    }

    /// Stop a bundle.
    ///
    /// Without [`LifecycleOptions::TRANSIENT`] the "should start" intent is
    /// cleared first. Stopping a bundle that is not starting or active does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Fails for the system bundle and fragments, unknown or uninstalled
    /// bundles and lock timeouts. If the activator's stop hook fails, the
    /// bundle still ends `RESOLVED` and the failure is returned afterwards.
    pub fn stop(&self, id: BundleId, options: LifecycleOptions) -> FrameworkResult<()> {
        Self::reject_system("stop", id)?;
        let (kind, _) = self.lookup_live(id)?;
        if kind.is_fragment() {
            return Err(FrameworkError::Unsupported {
                operation: "stop",
                reason: format!("bundle {id} is a fragment"),
            });
        }
        let _ctx = self.inner.locks.lock("stop", &[LockItem::Bundle(id)])?;
        if !options.is_transient() {
            self.inner.storage.set_persistently_started(id, false, false);
        }
        self.stop_locked(id)
    }

    /// Stop with the bundle lock already held.
    pub(super) fn stop_locked(&self, id: BundleId) -> FrameworkResult<()> {
        let (was_active, name, activation) = {
            let mut registry = self.inner.registry.write();
            let Some(record) = registry.record_mut(id) else {
                return Err(FrameworkError::BundleNotFound(id));
            };
            if !record.state.is_active_or_starting() {
                return Ok(());
            }
            let was_active = record.state == BundleState::Active;
            record.state = BundleState::Stopping;
            record.lazy_pending = false;
            (
                was_active,
                record.symbolic_name().to_owned(),
                record.activation.take(),
            )
        };
        self.fire(BundleEventKind::Stopping, id, &name);

        let mut failure = None;
        if let Some(activation) = activation {
            if was_active
                && let Some(activator) = &activation.activator
                && let Err(e) = activator.stop(&activation.context)
            {
                warn!(bundle_id = %id, error = %e, "Activator stop failed");
                failure = Some(e);
            }
            activation.context.release();
        }

        if let Some(record) = self.inner.registry.write().record_mut(id)
            && record.state != BundleState::Uninstalled
        {
            record.state = BundleState::Resolved;
        }
        self.fire(BundleEventKind::Stopped, id, &name);
        info!(bundle_id = %id, symbolic_name = %name, "Bundle stopped");

        match failure {
            Some(source) => Err(FrameworkError::ActivatorFailed { bundle: id, source }),
            None => Ok(()),
        }
    }

    /// Replace a bundle's content with a new revision.
    ///
    /// A running bundle is stopped first and restarted afterwards; restart
    /// failures are reported as framework error events. The superseded
    /// revision is disposed at once unless other bundles are still wired to
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Deployment`] if the new revision cannot be
    /// built (the bundle is restored first), plus the usual lookup and lock
    /// errors.
    pub fn update(&self, id: BundleId, input: Option<&[u8]>) -> FrameworkResult<()> {
        Self::reject_system("update", id)?;
        self.lookup_live(id)?;
        let _ctx = self
            .inner
            .locks
            .lock("update", &[LockItem::Bundle(id), LockItem::FrameworkWiring])?;

        let (state, location, lazy_pending, old) = {
            let registry = self.inner.registry.read();
            let record = registry.record(id).ok_or(FrameworkError::BundleNotFound(id))?;
            let old = record
                .current()
                .cloned()
                .ok_or(FrameworkError::BundleNotFound(id))?;
            (record.state, record.location.clone(), record.lazy_pending, old)
        };
        if state == BundleState::Uninstalled {
            return Err(FrameworkError::AlreadyUninstalled(id));
        }

        let was_running = state.is_running();
        let restart = if lazy_pending || self.inner.storage.activation_policy_used(id) {
            LifecycleOptions::TRANSIENT | LifecycleOptions::ACTIVATION_POLICY
        } else {
            LifecycleOptions::TRANSIENT
        };
        if was_running {
            match self.stop_locked(id) {
                Ok(()) => {},
                Err(err @ FrameworkError::ActivatorFailed { .. }) => self.report(Some(id), &err),
                Err(err) => return Err(err),
            }
        }

        let was_resolved = self.state(id).is_some_and(BundleState::is_resolved);
        let name = self.transition(id, BundleState::Installed);
        self.fire(BundleEventKind::Unresolved, id, &name);

        let descriptor = match self.inner.deployment.create_revision(&location, input) {
            Ok(descriptor) => descriptor,
            Err(source) => {
                warn!(bundle_id = %id, error = %source, "Update failed, restoring bundle");
                self.restore_after_failed_update(id, was_resolved, was_running, restart);
                return Err(FrameworkError::Deployment { location, source });
            },
        };

        let inserted = {
            let mut registry = self.inner.registry.write();
            match registry.find_symbolic(&descriptor.symbolic_name, descriptor.version) {
                Some(existing) if existing != id => Err(FrameworkError::DuplicateBundle {
                    symbolic_name: descriptor.symbolic_name.clone(),
                    version: descriptor.version,
                    existing,
                }),
                _ => {
                    let rev_id = registry.next_revision_id();
                    let revision = Arc::new(Revision::new(rev_id, id, descriptor.clone()));
                    registry.push_revision(Arc::clone(&revision));
                    registry.disable_fallback(old.id());
                    Ok(revision)
                },
            }
        };
        let revision = match inserted {
            Ok(revision) => revision,
            Err(err) => {
                descriptor.content.close();
                self.restore_after_failed_update(id, was_resolved, was_running, restart);
                return Err(err);
            },
        };

        self.inner.environment.install(&revision);
        self.fire(BundleEventKind::Updated, id, revision.symbolic_name());
        info!(
            bundle_id = %id,
            revision = %revision.id(),
            version = %revision.version(),
            "Bundle updated"
        );

        if !self.dispose_if_unused(old.id()) {
            debug!(bundle_id = %id, revision = %old.id(), "Superseded revision still in use");
        }

        if was_running && let Err(err) = self.start_locked(id, restart) {
            self.report(Some(id), &err);
        }
        Ok(())
    }

    fn restore_after_failed_update(
        &self,
        id: BundleId,
        was_resolved: bool,
        was_running: bool,
        restart: LifecycleOptions,
    ) {
        let still_wired = {
            let registry = self.inner.registry.read();
            registry
                .current(id)
                .is_some_and(|rev| registry.is_wired(rev.id()))
        };
        if was_resolved && still_wired {
            let name = self.transition(id, BundleState::Resolved);
            self.fire(BundleEventKind::Resolved, id, &name);
        }
        if was_running && let Err(err) = self.start_locked(id, restart) {
            self.report(Some(id), &err);
        }
    }

    /// Uninstall a bundle.
    ///
    /// A running bundle is stopped first; a stop failure is reported as a
    /// framework error event. Revisions that other bundles are still wired
    /// to stay registered until a refresh removes them.
    ///
    /// # Errors
    ///
    /// Fails for the system bundle, unknown or already uninstalled bundles
    /// and lock timeouts.
    pub fn uninstall(&self, id: BundleId) -> FrameworkResult<()> {
        Self::reject_system("uninstall", id)?;
        self.lookup_live(id)?;
        let _ctx = self
            .inner
            .locks
            .lock("uninstall", &[LockItem::Bundle(id), LockItem::FrameworkWiring])?;

        let state = self.lookup_live(id)?.1;
        if state.is_active_or_starting()
            && let Err(err) = self.stop_locked(id)
        {
            self.report(Some(id), &err);
        }
        self.inner.storage.remove(id);

        let (was_resolved, name, revisions) = {
            let mut registry = self.inner.registry.write();
            let record = registry
                .record_mut(id)
                .ok_or(FrameworkError::BundleNotFound(id))?;
            let was_resolved = record.state.is_resolved();
            record.state = BundleState::Uninstalled;
            let location = record.location.clone();
            let name = record.symbolic_name().to_owned();
            let revisions: Vec<_> = record.revisions.iter().map(|r| r.id()).collect();
            registry.locations.remove(&location);
            for revision in &revisions {
                registry.disable_fallback(*revision);
            }
            (was_resolved, name, revisions)
        };

        if was_resolved {
            self.fire(BundleEventKind::Unresolved, id, &name);
        }
        self.fire(BundleEventKind::Uninstalled, id, &name);
        info!(bundle_id = %id, symbolic_name = %name, "Bundle uninstalled");

        for revision in revisions {
            self.dispose_if_unused(revision);
        }
        let mut registry = self.inner.registry.write();
        if registry.record(id).is_some_and(|r| r.revisions.is_empty()) {
            registry.bundles.remove(&id);
            debug!(bundle_id = %id, "Bundle removed from registry");
        }
        Ok(())
    }

    /// Refresh one bundle: dispose its superseded revisions, drop the
    /// current wiring and return it to `INSTALLED`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::IllegalState`] unless the bundle is
    /// `INSTALLED` or `RESOLVED`.
    pub fn refresh_bundle(&self, id: BundleId) -> FrameworkResult<()> {
        Self::reject_system("refresh_bundle", id)?;
        self.lookup(id)?;
        let _ctx = self.inner.locks.lock(
            "refresh_bundle",
            &[LockItem::Bundle(id), LockItem::FrameworkWiring],
        )?;
        self.refresh_bundle_locked(id)
    }

    pub(super) fn refresh_bundle_locked(&self, id: BundleId) -> FrameworkResult<()> {
        let (was_resolved, current, name, disposed) = {
            let mut registry = self.inner.registry.write();
            let record = registry.record(id).ok_or(FrameworkError::BundleNotFound(id))?;
            if !matches!(record.state, BundleState::Installed | BundleState::Resolved) {
                return Err(FrameworkError::IllegalState(format!(
                    "bundle {id} must be INSTALLED or RESOLVED to refresh, not {}",
                    record.state
                )));
            }
            let was_resolved = record.state.is_resolved();
            let name = record.symbolic_name().to_owned();
            let current = record
                .current()
                .cloned()
                .ok_or(FrameworkError::BundleNotFound(id))?;
            let revisions: Vec<_> = record.revisions.iter().map(|r| r.id()).collect();

            let stale_fragments: Vec<_> = revisions
                .iter()
                .flat_map(|rev| registry.attachments.fragments_of(*rev))
                .filter(|fragment| {
                    registry.revisions.get(fragment).is_some_and(|f| {
                        let owner = registry.record(f.bundle());
                        owner.is_none_or(|o| {
                            o.state == BundleState::Uninstalled
                                || o.current().is_none_or(|c| c.id() != f.id())
                        })
                    })
                })
                .collect();

            let mut disposed = Vec::new();
            for revision in revisions.iter().filter(|r| **r != current.id()) {
                disposed.extend(registry.dispose_revision(*revision));
            }
            registry.drop_wiring(current.id());
            registry.fallbacks.remove(&current.id());
            for fragment in stale_fragments {
                if registry.attachments.hosts_of(fragment).is_empty()
                    && let Some(removed) = registry.dispose_revision(fragment)
                {
                    let owner = removed.bundle();
                    if registry.record(owner).is_some_and(|o| {
                        o.state == BundleState::Uninstalled && o.revisions.is_empty()
                    }) {
                        registry.bundles.remove(&owner);
                    }
                    disposed.push(removed);
                }
            }
            if let Some(record) = registry.record_mut(id) {
                record.state = BundleState::Installed;
            }
            (was_resolved, current, name, disposed)
        };

        for revision in &disposed {
            self.release_revision(revision);
        }
        if was_resolved {
            self.fire(BundleEventKind::Unresolved, id, &name);
        }
        self.inner.environment.refresh(&current);
        debug!(bundle_id = %id, disposed = disposed.len(), "Bundle refreshed");
        Ok(())
    }

    /// Remove an uninstalled bundle and every revision it still has.
    pub(super) fn remove_uninstalled(&self, id: BundleId) {
        let disposed: Vec<_> = {
            let mut registry = self.inner.registry.write();
            let revisions: Vec<_> = registry
                .record(id)
                .map(|r| r.revisions.iter().map(|rev| rev.id()).collect())
                .unwrap_or_default();
            let disposed = revisions
                .into_iter()
                .filter_map(|rev| registry.dispose_revision(rev))
                .collect();
            registry.bundles.remove(&id);
            disposed
        };
        for revision in &disposed {
            self.release_revision(revision);
        }
        debug!(bundle_id = %id, "Uninstalled bundle removed");
    }
}
