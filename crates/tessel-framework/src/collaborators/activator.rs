use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tessel_core::{BundleId, RevisionId};
use thiserror::Error;
use tracing::debug;

use crate::framework::{Framework, FrameworkInner};
use crate::revision::Revision;

/// Failure reported by an activator hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActivatorError {
    /// What went wrong.
    pub message: String,
}

impl ActivatorError {
    /// Create an activator error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ActivatorError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ActivatorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// User start/stop hooks for a bundle.
///
/// Both hooks run while the calling thread holds the bundle's lifecycle
/// lock. A hook that calls back into `start`/`stop`/`update`/`uninstall` of
/// the *same* bundle re-enters that lock and proceeds; a hook that waits on
/// another thread doing so will time out.
pub trait Activator: Send + Sync {
    /// Called when the bundle starts.
    ///
    /// # Errors
    ///
    /// An error aborts the start and unwinds the bundle to `RESOLVED`.
    fn start(&self, context: &BundleContext) -> Result<(), ActivatorError>;

    /// Called when an `ACTIVE` bundle stops.
    ///
    /// # Errors
    ///
    /// The error is raised to the caller after the bundle reaches
    /// `RESOLVED`.
    fn stop(&self, context: &BundleContext) -> Result<(), ActivatorError>;
}

/// Instantiates activators from a revision's declared activator name.
pub trait ActivatorFactory: Send + Sync {
    /// Create the activator for `revision`.
    ///
    /// Returns `Ok(None)` when the factory does not know the declared name.
    ///
    /// # Errors
    ///
    /// Returns an error if construction fails.
    fn create(&self, revision: &Revision) -> Result<Option<Arc<dyn Activator>>, ActivatorError>;
}

/// Factory that knows no activators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActivators;

impl ActivatorFactory for NoActivators {
    fn create(&self, _revision: &Revision) -> Result<Option<Arc<dyn Activator>>, ActivatorError> {
        Ok(None)
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// The execution context handed to an activator for one activation.
///
/// Destroyed when the bundle stops or its start is unwound. Cleanup
/// callbacks registered with [`on_release`](Self::on_release) run at that
/// point, in reverse registration order.
pub struct BundleContext {
    bundle: BundleId,
    revision: RevisionId,
    symbolic_name: String,
    framework: Weak<FrameworkInner>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl BundleContext {
    pub(crate) fn new(revision: &Revision, framework: Weak<FrameworkInner>) -> Self {
        Self {
            bundle: revision.bundle(),
            revision: revision.id(),
            symbolic_name: revision.symbolic_name().to_owned(),
            framework,
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// The bundle being activated.
    #[must_use]
    pub fn bundle(&self) -> BundleId {
        self.bundle
    }

    /// The revision that was current when activation began.
    #[must_use]
    pub fn revision(&self) -> RevisionId {
        self.revision
    }

    /// The bundle's symbolic name.
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// A handle to the framework, unless it has been dropped.
    #[must_use]
    pub fn framework(&self) -> Option<Framework> {
        self.framework.upgrade().map(Framework::from_inner)
    }

    /// Register a callback that runs when this context is destroyed.
    ///
    /// Use it to unregister whatever the activator published.
    pub fn on_release(&self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(cleanup));
    }

    /// Run and drop every registered cleanup. Returns how many ran.
    pub(crate) fn release(&self) -> usize {
        let cleanups =
            std::mem::take(&mut *self.cleanups.lock().unwrap_or_else(PoisonError::into_inner));
        let count = cleanups.len();
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        if count > 0 {
            debug!(bundle_id = %self.bundle, released = count, "Released bundle context");
        }
        count
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle", &self.bundle)
            .field("revision", &self.revision)
            .field("symbolic_name", &self.symbolic_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tessel_core::{BundleKind, Version};

    use crate::revision::{EmptyContent, RevisionDescriptor};

    fn revision() -> Revision {
        Revision::new(
            RevisionId(3),
            BundleId(2),
            RevisionDescriptor {
                symbolic_name: "ctx".into(),
                version: Version::new(1, 0, 0),
                kind: BundleKind::Host,
                capabilities: Vec::new(),
                requirements: Vec::new(),
                dynamic_imports: Vec::new(),
                activator: None,
                lazy_activation: false,
                content: Arc::new(EmptyContent),
            },
        )
    }

    #[test]
    fn test_release_runs_cleanups_in_reverse_once() {
        let ctx = BundleContext::new(&revision(), Weak::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            ctx.on_release(move || order.lock().unwrap().push(i));
        }

        assert_eq!(ctx.release(), 3);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(ctx.release(), 0);
    }

    #[test]
    fn test_context_identity_and_dropped_framework() {
        let ctx = BundleContext::new(&revision(), Weak::new());
        assert_eq!(ctx.bundle(), BundleId(2));
        assert_eq!(ctx.revision(), RevisionId(3));
        assert_eq!(ctx.symbolic_name(), "ctx");
        assert!(ctx.framework().is_none());
    }

    #[test]
    fn test_no_activators_factory() {
        let created = NoActivators.create(&revision()).unwrap();
        assert!(created.is_none());
        assert_eq!(ActivatorError::from("x").to_string(), "x");
    }
}
