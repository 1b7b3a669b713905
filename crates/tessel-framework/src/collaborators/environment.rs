use crate::revision::Revision;
use crate::wiring::Wiring;

/// The resolver-facing state the framework keeps in sync with its registry.
///
/// Wirings themselves live in the framework's registry; the environment is
/// told when they appear so it can mirror them.
pub trait Environment: Send + Sync {
    /// A revision was created by install or update.
    fn install(&self, revision: &Revision);

    /// A revision was disposed.
    fn uninstall(&self, revision: &Revision);

    /// A revision's wiring was dropped; rebuild its resolver-facing form.
    fn refresh(&self, revision: &Revision);

    /// A revision received its wiring.
    fn wired(&self, _revision: &Revision, _wiring: &Wiring) {}
}

/// Environment that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnvironment;

impl Environment for NoopEnvironment {
    fn install(&self, _revision: &Revision) {}

    fn uninstall(&self, _revision: &Revision) {}

    fn refresh(&self, _revision: &Revision) {}
}
