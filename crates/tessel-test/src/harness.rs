//! A framework wired to the in-memory collaborators.

use std::sync::Arc;

use tessel_core::{BundleId, RevisionId};
use tessel_events::{EventBus, EventSink, EventSubscriber};
use tessel_framework::collaborators::{
    ActivatorFactory, BundleStorage, DeploymentProvider, Environment, InMemoryStorage, Resolver,
};
use tessel_framework::{Content, Framework, FrameworkSettings};
use tracing_subscriber::EnvFilter;

use crate::fixtures::BundleFixture;
use crate::mocks::{
    MatchingResolver, MemoryContent, MemoryDeployment, RecordingEnvironment, RecordingSubscriber,
    ScriptedActivatorFactory,
};

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`. Later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A framework plus handles to every collaborator it was built with.
pub struct TestFramework {
    /// The framework under test.
    pub framework: Framework,
    /// Staged bundle fixtures.
    pub deployment: Arc<MemoryDeployment>,
    /// The resolver.
    pub resolver: Arc<MatchingResolver>,
    /// Environment call recorder.
    pub environment: Arc<RecordingEnvironment>,
    /// Scripted activators.
    pub activators: Arc<ScriptedActivatorFactory>,
    /// Persisted bundle state.
    pub storage: Arc<InMemoryStorage>,
    /// The event bus the framework fires into.
    pub events: EventBus,
    /// Every event published on `events`.
    pub recorder: Arc<RecordingSubscriber>,
}

impl TestFramework {
    /// A framework with default settings, not yet launched.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(FrameworkSettings::default())
    }

    /// A framework with default settings, launched to its beginning start
    /// level.
    #[must_use]
    pub fn launched() -> Self {
        let t = Self::new();
        t.framework.launch().expect("launch failed");
        t
    }

    /// A framework with the given settings and fresh storage.
    #[must_use]
    pub fn with_settings(settings: FrameworkSettings) -> Self {
        Self::with_storage(settings, Arc::new(InMemoryStorage::new()))
    }

    /// A framework reusing `storage`, as after a restart.
    #[must_use]
    pub fn with_storage(settings: FrameworkSettings, storage: Arc<InMemoryStorage>) -> Self {
        Self::build(settings, storage, None)
    }

    /// A framework whose system bundle serves `content`.
    #[must_use]
    pub fn with_system_content(settings: FrameworkSettings, content: Arc<MemoryContent>) -> Self {
        Self::build(
            settings,
            Arc::new(InMemoryStorage::new()),
            Some(content as Arc<dyn Content>),
        )
    }

    fn build(
        settings: FrameworkSettings,
        storage: Arc<InMemoryStorage>,
        system_content: Option<Arc<dyn Content>>,
    ) -> Self {
        init_test_logging();
        let deployment = Arc::new(MemoryDeployment::new());
        let resolver = Arc::new(MatchingResolver::new());
        let environment = Arc::new(RecordingEnvironment::new());
        let activators = Arc::new(ScriptedActivatorFactory::new());
        let events = EventBus::new();
        let recorder = Arc::new(RecordingSubscriber::new());
        events
            .registry()
            .register(Arc::clone(&recorder) as Arc<dyn EventSubscriber>);

        let mut builder = Framework::builder(settings)
            .resolver(Arc::clone(&resolver) as Arc<dyn Resolver>)
            .deployment(Arc::clone(&deployment) as Arc<dyn DeploymentProvider>)
            .environment(Arc::clone(&environment) as Arc<dyn Environment>)
            .activators(Arc::clone(&activators) as Arc<dyn ActivatorFactory>)
            .storage(Arc::clone(&storage) as Arc<dyn BundleStorage>)
            .events(Arc::new(events.clone()) as Arc<dyn EventSink>);
        if let Some(content) = system_content {
            builder = builder.system_content(content);
        }
        let framework = builder.build().expect("framework build failed");

        Self {
            framework,
            deployment,
            resolver,
            environment,
            activators,
            storage,
            events,
            recorder,
        }
    }

    /// Stage `fixture` at `location` and install it.
    pub fn install(&self, location: &str, fixture: BundleFixture) -> BundleId {
        self.deployment.put(location, fixture);
        self.framework
            .install(location, None)
            .expect("install failed")
    }

    /// The current revision id of a bundle.
    #[must_use]
    pub fn revision_of(&self, bundle: BundleId) -> RevisionId {
        self.framework
            .current_revision(bundle)
            .expect("bundle has no current revision")
            .id()
    }
}

impl Default for TestFramework {
    fn default() -> Self {
        Self::new()
    }
}
