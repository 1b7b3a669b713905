//! In-memory collaborators for testing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tessel_core::{BundleId, RevisionId};
use tessel_events::{BundleEventKind, EventBus, EventSubscriber, FrameworkEventKind, TesselEvent};
use tessel_framework::collaborators::{
    Activator, ActivatorError, ActivatorFactory, BundleContext, DeploymentError,
    DeploymentProvider, Environment, ResolutionError, ResolveRequest, ResolvedWires, Resolver,
};
use tessel_framework::{Content, Namespace, Revision, RevisionDescriptor, Wire, Wiring};

use crate::fixtures::BundleFixture;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bundle content held in memory.
#[derive(Debug, Default)]
pub struct MemoryContent {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryContent {
    /// Empty content.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&self, path: &str, data: &[u8]) {
        lock(&self.entries).insert(path.trim_start_matches('/').to_owned(), data.to_vec());
    }

    /// Whether the framework has closed this content.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Content for MemoryContent {
    fn entry(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.entries).get(path).cloned()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A resolver that matches requirements against candidate capabilities.
///
/// Package and bundle requirements wire to the highest-version provider
/// (lowest revision id on ties). Host requirements wire to every matching
/// host, so a fragment attaches to all of them. Unresolved providers are
/// pulled into the batch on demand.
#[derive(Debug, Default)]
pub struct MatchingResolver {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MatchingResolver {
    /// Create a new resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to resolve any revision with this symbolic name.
    pub fn fail_symbolic_name(&self, name: &str) {
        lock(&self.failing).insert(name.to_owned());
    }

    /// Stop refusing every name.
    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
    }

    /// How many batches were resolved.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn wires_for(
        revision: &Revision,
        request: &ResolveRequest,
        resolved: &BTreeSet<RevisionId>,
    ) -> Option<Vec<Wire>> {
        let mut wires = Vec::new();
        for requirement in revision.requirements() {
            let mut providers: Vec<(&Arc<Revision>, Wire)> = request
                .candidates
                .iter()
                .filter(|c| c.id() != revision.id() && resolved.contains(&c.id()))
                .filter_map(|c| {
                    let capability = c.capabilities().iter().find(|cap| requirement.matches(cap))?;
                    Some((
                        c,
                        Wire {
                            provider: c.id(),
                            requirer: revision.id(),
                            capability: capability.clone(),
                            requirement: requirement.clone(),
                        },
                    ))
                })
                .collect();
            if providers.is_empty() {
                if requirement.optional {
                    continue;
                }
                return None;
            }
            if requirement.namespace == Namespace::Host {
                wires.extend(providers.into_iter().map(|(_, wire)| wire));
            } else {
                providers.sort_by(|(a, wa), (b, wb)| {
                    wb.capability
                        .version
                        .cmp(&wa.capability.version)
                        .then(a.id().cmp(&b.id()))
                });
                wires.extend(providers.into_iter().map(|(_, wire)| wire).take(1));
            }
        }
        Some(wires)
    }
}

impl Resolver for MatchingResolver {
    fn resolve(&self, request: &ResolveRequest) -> Result<ResolvedWires, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = lock(&self.failing).clone();

        let mut pending: Vec<Arc<Revision>> = request
            .mandatory
            .iter()
            .chain(&request.optional)
            .filter(|r| !request.is_resolved(r.id()))
            .cloned()
            .collect();
        let mut next = 0;
        while let Some(revision) = pending.get(next).cloned() {
            let needed: Vec<Arc<Revision>> = request
                .candidates
                .iter()
                .filter(|c| !request.is_resolved(c.id()) && !pending.iter().any(|p| p.id() == c.id()))
                .filter(|c| {
                    revision
                        .requirements()
                        .iter()
                        .any(|req| c.capabilities().iter().any(|cap| req.matches(cap)))
                })
                .cloned()
                .collect();
            pending.extend(needed);
            next = next.saturating_add(1);
        }
        pending.retain(|r| !failing.contains(r.symbolic_name()));

        let mut resolved = request.resolved.clone();
        let mut out = ResolvedWires::new();
        loop {
            let before = pending.len();
            pending.retain(|revision| match Self::wires_for(revision, request, &resolved) {
                Some(wires) => {
                    resolved.insert(revision.id());
                    out.insert(revision.id(), wires);
                    false
                },
                None => true,
            });
            if pending.len() == before {
                break;
            }
        }

        match request.mandatory.iter().find(|r| !resolved.contains(&r.id())) {
            Some(missing) => Err(ResolutionError::new(
                Some(missing.id()),
                format!("unsatisfied requirements of {}", missing.symbolic_name()),
            )),
            None => Ok(out),
        }
    }
}

/// One call the framework made on the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentCall {
    /// A revision was created.
    Install(RevisionId),
    /// A revision was disposed.
    Uninstall(RevisionId),
    /// A bundle's current revision lost its wiring.
    Refresh(RevisionId),
    /// A revision received its wiring.
    Wired {
        /// The revision.
        revision: RevisionId,
        /// How many required wires it has.
        required: usize,
    },
}

/// An environment that records every call.
#[derive(Debug, Default)]
pub struct RecordingEnvironment {
    calls: Mutex<Vec<EnvironmentCall>>,
}

impl RecordingEnvironment {
    /// Create a new recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EnvironmentCall> {
        lock(&self.calls).clone()
    }

    /// Revisions the framework disposed.
    #[must_use]
    pub fn uninstalled(&self) -> Vec<RevisionId> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                EnvironmentCall::Uninstall(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl Environment for RecordingEnvironment {
    fn install(&self, revision: &Revision) {
        lock(&self.calls).push(EnvironmentCall::Install(revision.id()));
    }

    fn uninstall(&self, revision: &Revision) {
        lock(&self.calls).push(EnvironmentCall::Uninstall(revision.id()));
    }

    fn refresh(&self, revision: &Revision) {
        lock(&self.calls).push(EnvironmentCall::Refresh(revision.id()));
    }

    fn wired(&self, revision: &Revision, wiring: &Wiring) {
        lock(&self.calls).push(EnvironmentCall::Wired {
            revision: revision.id(),
            required: wiring.required().len(),
        });
    }
}

type StartHook = Box<dyn Fn(&BundleContext) + Send + Sync>;

/// An activator whose behaviour is set by the test.
///
/// Every start and stop is appended to the log shared with its factory as
/// `start:<name>` or `stop:<name>`.
pub struct ScriptedActivator {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    on_start: Mutex<Option<StartHook>>,
}

impl fmt::Debug for ScriptedActivator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedActivator")
            .field("name", &self.name)
            .field("starts", &self.starts())
            .field("stops", &self.stops())
            .finish_non_exhaustive()
    }
}

impl ScriptedActivator {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_owned(),
            log,
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            on_start: Mutex::new(None),
        }
    }

    /// Make the start hook fail (after running `on_start`).
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make the stop hook fail.
    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Run `hook` inside every start.
    pub fn on_start(&self, hook: impl Fn(&BundleContext) + Send + Sync + 'static) {
        *lock(&self.on_start) = Some(Box::new(hook));
    }

    /// Number of start calls.
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of stop calls.
    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Activator for ScriptedActivator {
    fn start(&self, context: &BundleContext) -> Result<(), ActivatorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        lock(&self.log).push(format!("start:{}", self.name));
        if let Some(hook) = lock(&self.on_start).as_ref() {
            hook(context);
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ActivatorError::new(format!("{} refused to start", self.name)));
        }
        Ok(())
    }

    fn stop(&self, _context: &BundleContext) -> Result<(), ActivatorError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        lock(&self.log).push(format!("stop:{}", self.name));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(ActivatorError::new(format!("{} refused to stop", self.name)));
        }
        Ok(())
    }
}

/// Hands out [`ScriptedActivator`]s by declared activator name.
#[derive(Debug, Default)]
pub struct ScriptedActivatorFactory {
    activators: Mutex<HashMap<String, Arc<ScriptedActivator>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedActivatorFactory {
    /// Create a new factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The activator for `name`, created on first use.
    pub fn script(&self, name: &str) -> Arc<ScriptedActivator> {
        let mut activators = lock(&self.activators);
        Arc::clone(
            activators
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(ScriptedActivator::new(name, Arc::clone(&self.log)))),
        )
    }

    /// Every start and stop so far, in order.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Forget the log.
    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }
}

impl ActivatorFactory for ScriptedActivatorFactory {
    fn create(&self, revision: &Revision) -> Result<Option<Arc<dyn Activator>>, ActivatorError> {
        let Some(name) = revision.activator() else {
            return Ok(None);
        };
        Ok(lock(&self.activators)
            .get(name)
            .map(|a| Arc::clone(a) as Arc<dyn Activator>))
    }
}

/// A synchronous event-bus subscriber that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<TesselEvent>>,
}

impl RecordingSubscriber {
    /// Create a new recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<TesselEvent> {
        lock(&self.events).clone()
    }

    /// Bundle event kinds fired for one bundle, in order.
    #[must_use]
    pub fn bundle_kinds(&self, bundle: BundleId) -> Vec<BundleEventKind> {
        lock(&self.events)
            .iter()
            .filter(|e| e.bundle_kind().is_some() && e.bundle() == Some(bundle))
            .filter_map(TesselEvent::bundle_kind)
            .collect()
    }

    /// Bundles that received a bundle event of `kind`, in order.
    #[must_use]
    pub fn bundles_with(&self, kind: BundleEventKind) -> Vec<BundleId> {
        lock(&self.events)
            .iter()
            .filter(|e| e.bundle_kind() == Some(kind))
            .filter_map(TesselEvent::bundle)
            .collect()
    }

    /// Framework event kinds, in order.
    #[must_use]
    pub fn framework_kinds(&self) -> Vec<FrameworkEventKind> {
        lock(&self.events)
            .iter()
            .filter_map(TesselEvent::framework_kind)
            .collect()
    }

    /// Framework error events as (bundle, rendered error).
    #[must_use]
    pub fn errors(&self) -> Vec<(Option<BundleId>, String)> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                TesselEvent::Framework {
                    kind: FrameworkEventKind::Error,
                    bundle,
                    error,
                    ..
                } => Some((*bundle, error.clone().unwrap_or_default())),
                _ => None,
            })
            .collect()
    }

    /// Forget every event.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn on_event(&self, event: &TesselEvent, _bus: &EventBus) {
        lock(&self.events).push(event.clone());
    }
}

/// A deployment provider serving staged [`BundleFixture`]s by location.
///
/// On update, `input` names another staged location to read instead.
#[derive(Debug, Default)]
pub struct MemoryDeployment {
    bundles: Mutex<HashMap<String, BundleFixture>>,
    created: AtomicUsize,
}

impl MemoryDeployment {
    /// Create a new provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a fixture at `location`, replacing any previous one.
    pub fn put(&self, location: &str, fixture: BundleFixture) {
        lock(&self.bundles).insert(location.to_owned(), fixture);
    }

    /// Remove the fixture at `location`.
    pub fn remove(&self, location: &str) {
        lock(&self.bundles).remove(location);
    }

    /// How many revisions were created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DeploymentProvider for MemoryDeployment {
    fn create_revision(
        &self,
        location: &str,
        input: Option<&[u8]>,
    ) -> Result<RevisionDescriptor, DeploymentError> {
        let key = match input {
            Some(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| DeploymentError::InvalidMetadata(e.to_string()))?
                .to_owned(),
            None => location.to_owned(),
        };
        let descriptor = lock(&self.bundles)
            .get(&key)
            .map(BundleFixture::descriptor)
            .ok_or(DeploymentError::NotFound(key))?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::Version;

    #[test]
    fn test_memory_content_close_and_entries() {
        let content = MemoryContent::new();
        content.insert("/a/b.txt", b"x");
        assert_eq!(content.entry("a/b.txt"), Some(b"x".to_vec()));
        assert!(!content.is_closed());
        content.close();
        assert!(content.is_closed());
    }

    #[test]
    fn test_deployment_reads_staged_location() {
        let deployment = MemoryDeployment::new();
        deployment.put("mem:a", BundleFixture::host("a", "1.0.0"));
        deployment.put("mem:a-v2", BundleFixture::host("a", "2.0.0"));

        let first = deployment.create_revision("mem:a", None).unwrap();
        assert_eq!(first.version, Version::new(1, 0, 0));
        let update = deployment
            .create_revision("mem:a", Some(b"mem:a-v2".as_slice()))
            .unwrap();
        assert_eq!(update.version, Version::new(2, 0, 0));
        assert!(matches!(
            deployment.create_revision("mem:b", None),
            Err(DeploymentError::NotFound(_))
        ));
        assert_eq!(deployment.created(), 2);
    }

    #[test]
    fn test_scripted_activators_share_a_log() {
        let factory = ScriptedActivatorFactory::new();
        let a = factory.script("a");
        assert!(Arc::ptr_eq(&a, &factory.script("a")));
        a.fail_start(true);
        assert_eq!(a.starts(), 0);
        assert!(factory.log().is_empty());
    }
}
