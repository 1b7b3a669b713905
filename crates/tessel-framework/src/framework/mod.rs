//! The framework: one explicit runtime context that owns the registry, the
//! lock coordinator, the start-level controller and every collaborator.

use std::sync::Arc;

use tessel_core::{BundleId, BundleKind, BundleState, RevisionId, Version};
use tessel_events::{BundleEventKind, EventSink, FrameworkEventKind, NoopEventSink};
use tracing::{debug, info, warn};

use crate::collaborators::{
    ActivatorFactory, BundleStorage, DeploymentProvider, Environment, InMemoryStorage,
    NoActivators, NoopEnvironment, Resolver,
};
use crate::error::{FrameworkError, FrameworkResult};
use crate::lock::LockCoordinator;
use crate::package::PackagePattern;
use crate::registry::{BundleInfo, BundleRecord, BundleRegistry};
use crate::revision::{Content, EmptyContent, Revision, RevisionDescriptor};
use crate::settings::FrameworkSettings;
use crate::wiring::{Capability, Namespace, Wiring};

mod lifecycle;
mod loader;
mod refresh;
mod resolve;
mod start_level;


pub use loader::Resource;
pub use start_level::{PendingChange, StartLevelController};

/// Symbolic name of the system bundle.
pub const SYSTEM_BUNDLE_NAME: &str = "tessel.framework";

/// Location of the system bundle.
pub const SYSTEM_BUNDLE_LOCATION: &str = "System Bundle";

/// Shared state behind every [`Framework`] handle.
pub(crate) struct FrameworkInner {
    pub(super) settings: FrameworkSettings,
    pub(super) registry: BundleRegistry,
    pub(super) locks: LockCoordinator,
    pub(super) resolver: Arc<dyn Resolver>,
    pub(super) environment: Arc<dyn Environment>,
    pub(super) deployment: Arc<dyn DeploymentProvider>,
    pub(super) activators: Arc<dyn ActivatorFactory>,
    pub(super) storage: Arc<dyn BundleStorage>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) start_level: StartLevelController,
}

/// A handle to a running module framework.
///
/// Cheap to clone; all clones share one registry. Lifecycle operations run
/// synchronously on the calling thread, except start-level changes, which
/// a dedicated worker thread applies in order.
#[derive(Clone)]
pub struct Framework {
    inner: Arc<FrameworkInner>,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("registry", &self.inner.registry)
            .field("start_level", &self.inner.start_level.level())
            .finish_non_exhaustive()
    }
}

/// Builds a [`Framework`] from its collaborators.
pub struct FrameworkBuilder {
    settings: FrameworkSettings,
    resolver: Option<Arc<dyn Resolver>>,
    deployment: Option<Arc<dyn DeploymentProvider>>,
    environment: Arc<dyn Environment>,
    activators: Arc<dyn ActivatorFactory>,
    storage: Arc<dyn BundleStorage>,
    events: Arc<dyn EventSink>,
    system_content: Arc<dyn Content>,
}

impl FrameworkBuilder {
    /// The resolver. Required.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The deployment provider. Required.
    #[must_use]
    pub fn deployment(mut self, deployment: Arc<dyn DeploymentProvider>) -> Self {
        self.deployment = Some(deployment);
        self
    }

    /// The environment kept in sync with the registry.
    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// The activator factory.
    #[must_use]
    pub fn activators(mut self, activators: Arc<dyn ActivatorFactory>) -> Self {
        self.activators = activators;
        self
    }

    /// Persisted per-bundle state. Defaults to [`InMemoryStorage`].
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn BundleStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Where lifecycle and framework events go.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Content served for system packages.
    #[must_use]
    pub fn system_content(mut self, content: Arc<dyn Content>) -> Self {
        self.system_content = content;
        self
    }

    /// Build the framework and register the system bundle.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::IllegalState`] if no resolver or deployment
    /// provider was supplied.
    pub fn build(self) -> FrameworkResult<Framework> {
        let resolver = self
            .resolver
            .ok_or_else(|| FrameworkError::IllegalState("no resolver configured".into()))?;
        let deployment = self.deployment.ok_or_else(|| {
            FrameworkError::IllegalState("no deployment provider configured".into())
        })?;

        if self.settings.storage_clean {
            self.storage.clear();
            debug!("Cleared persisted bundle state");
        }

        let registry = BundleRegistry::new();
        register_system_bundle(&registry, &self.settings, self.system_content);

        let inner = FrameworkInner {
            locks: LockCoordinator::new(self.settings.lock_timeout),
            settings: self.settings,
            registry,
            resolver,
            environment: self.environment,
            deployment,
            activators: self.activators,
            storage: self.storage,
            events: self.events,
            start_level: StartLevelController::new(),
        };
        info!(
            lock_timeout = ?inner.settings.lock_timeout,
            beginning_start_level = inner.settings.beginning_start_level,
            "Framework created"
        );
        Ok(Framework {
            inner: Arc::new(inner),
        })
    }
}

fn register_system_bundle(
    registry: &BundleRegistry,
    settings: &FrameworkSettings,
    content: Arc<dyn Content>,
) {
    let version = Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(Version::EMPTY);
    let mut capabilities: Vec<Capability> = settings
        .system_packages
        .iter()
        .filter_map(PackagePattern::exact)
        .map(|name| Capability::package(name, version))
        .collect();
    capabilities.push(Capability::new(Namespace::Bundle, SYSTEM_BUNDLE_NAME, version));

    let mut state = registry.write();
    let id = state.next_bundle_id();
    let rev_id = state.next_revision_id();
    let revision = Arc::new(Revision::new(
        rev_id,
        id,
        RevisionDescriptor {
            symbolic_name: SYSTEM_BUNDLE_NAME.into(),
            version,
            kind: BundleKind::System,
            capabilities,
            requirements: Vec::new(),
            dynamic_imports: Vec::new(),
            activator: None,
            lazy_activation: false,
            content,
        },
    ));
    let mut record = BundleRecord::new(id, SYSTEM_BUNDLE_LOCATION.into(), Arc::clone(&revision));
    record.state = BundleState::Resolved;
    state.bundles.insert(id, record);
    state.revisions.insert(rev_id, revision);
    state.wirings.insert(rev_id, Wiring::new(rev_id, Vec::new()));
    state.locations.insert(SYSTEM_BUNDLE_LOCATION.into(), id);
}

impl Framework {
    /// Start building a framework.
    #[must_use]
    pub fn builder(settings: FrameworkSettings) -> FrameworkBuilder {
        FrameworkBuilder {
            settings,
            resolver: None,
            deployment: None,
            environment: Arc::new(NoopEnvironment),
            activators: Arc::new(NoActivators),
            storage: Arc::new(InMemoryStorage::new()),
            events: Arc::new(NoopEventSink),
            system_content: Arc::new(EmptyContent),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FrameworkInner>) -> Self {
        Self { inner }
    }

    /// The settings the framework was built with.
    #[must_use]
    pub fn settings(&self) -> &FrameworkSettings {
        &self.inner.settings
    }

    /// The bundle registry.
    #[must_use]
    pub fn registry(&self) -> &BundleRegistry {
        &self.inner.registry
    }

    /// The lock coordinator.
    #[must_use]
    pub fn locks(&self) -> &LockCoordinator {
        &self.inner.locks
    }

    /// The persisted bundle state.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn BundleStorage> {
        &self.inner.storage
    }

    /// Snapshot of one bundle.
    #[must_use]
    pub fn bundle(&self, id: BundleId) -> Option<BundleInfo> {
        self.inner.registry.bundle(id)
    }

    /// Snapshots of every bundle, including zombies, by id.
    #[must_use]
    pub fn bundles(&self) -> Vec<BundleInfo> {
        self.inner.registry.bundles()
    }

    /// A bundle's lifecycle state.
    #[must_use]
    pub fn state(&self, id: BundleId) -> Option<BundleState> {
        self.inner.registry.state(id)
    }

    /// A bundle's current revision.
    #[must_use]
    pub fn current_revision(&self, id: BundleId) -> Option<Arc<Revision>> {
        self.inner.registry.current_revision(id)
    }

    /// A revision's wiring.
    ///
    /// Environments query wirings here; the registry is their only owner.
    #[must_use]
    pub fn wiring(&self, revision: RevisionId) -> Option<Wiring> {
        self.inner.registry.wiring(revision)
    }

    /// Fragments attached to a host revision.
    #[must_use]
    pub fn fragments_of(&self, host: RevisionId) -> Vec<RevisionId> {
        self.inner.registry.fragments_of(host)
    }

    /// Hosts a fragment revision is attached to.
    #[must_use]
    pub fn hosts_of(&self, fragment: RevisionId) -> Vec<RevisionId> {
        self.inner.registry.hosts_of(fragment)
    }

    /// Kind and state of a bundle.
    pub(super) fn lookup(&self, id: BundleId) -> FrameworkResult<(BundleKind, BundleState)> {
        self.inner
            .registry
            .read()
            .record(id)
            .map(|r| (r.kind, r.state))
            .ok_or(FrameworkError::BundleNotFound(id))
    }

    /// Look up a bundle that must not be uninstalled.
    pub(super) fn lookup_live(&self, id: BundleId) -> FrameworkResult<(BundleKind, BundleState)> {
        let (kind, state) = self.lookup(id)?;
        if state == BundleState::Uninstalled {
            return Err(FrameworkError::AlreadyUninstalled(id));
        }
        Ok((kind, state))
    }

    pub(super) fn reject_system(operation: &'static str, id: BundleId) -> FrameworkResult<()> {
        if id.is_system() {
            return Err(FrameworkError::Unsupported {
                operation,
                reason: "the system bundle is managed by the framework".into(),
            });
        }
        Ok(())
    }

    /// Set a bundle's state. Returns its symbolic name for event firing.
    pub(super) fn transition(&self, id: BundleId, state: BundleState) -> String {
        let mut registry = self.inner.registry.write();
        match registry.record_mut(id) {
            Some(record) => {
                debug!(bundle_id = %id, from = ?record.state, to = ?state, "Bundle state transition");
                record.state = state;
                record.symbolic_name().to_owned()
            },
            None => String::new(),
        }
    }

    pub(super) fn fire(&self, kind: BundleEventKind, id: BundleId, symbolic_name: &str) {
        self.inner.events.fire_bundle_event(kind, id, symbolic_name);
    }

    pub(super) fn fire_framework(&self, kind: FrameworkEventKind) {
        self.inner.events.fire_framework_event(kind, None, None);
    }

    /// Report a failure the framework hit while driving a batch.
    pub(super) fn report(&self, bundle: Option<BundleId>, err: &FrameworkError) {
        warn!(bundle_id = ?bundle, error = %err, "Bundle operation failed");
        let message = err.to_string();
        self.inner
            .events
            .fire_framework_event(FrameworkEventKind::Error, bundle, Some(&message));
    }

    /// Notify the environment that a revision is gone and close its content.
    pub(super) fn release_revision(&self, revision: &Revision) {
        self.inner.environment.uninstall(revision);
        revision.content().close();
    }

    /// Dispose a revision unless another wired revision still needs it.
    pub(super) fn dispose_if_unused(&self, revision: RevisionId) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write();
            if registry.is_in_use(revision) {
                None
            } else {
                registry.dispose_revision(revision)
            }
        };
        match removed {
            Some(revision) => {
                self.release_revision(&revision);
                true
            },
            None => false,
        }
    }
}
