//! Runtime settings of a framework instance.

use std::time::Duration;

use crate::package::PackagePattern;

/// Settings a [`Framework`](crate::Framework) is built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkSettings {
    /// How long lifecycle operations wait for their locks.
    pub lock_timeout: Duration,
    /// Start level reached by [`Framework::launch`](crate::Framework::launch).
    pub beginning_start_level: u32,
    /// Start level persisted for newly installed bundles.
    pub initial_bundle_start_level: u32,
    /// Packages served by the system bundle.
    pub system_packages: Vec<PackagePattern>,
    /// Clear persisted bundle state when the framework is built.
    pub storage_clean: bool,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            beginning_start_level: 1,
            initial_bundle_start_level: 1,
            system_packages: vec![
                PackagePattern::Exact("tessel.framework".into()),
                PackagePattern::Prefix("tessel.framework".into()),
            ],
            storage_clean: false,
        }
    }
}

impl FrameworkSettings {
    /// Set the lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the beginning start level.
    #[must_use]
    pub fn with_beginning_start_level(mut self, level: u32) -> Self {
        self.beginning_start_level = level;
        self
    }

    /// Set the initial bundle start level.
    #[must_use]
    pub fn with_initial_bundle_start_level(mut self, level: u32) -> Self {
        self.initial_bundle_start_level = level;
        self
    }

    /// Add a system package pattern.
    #[must_use]
    pub fn with_system_package(mut self, pattern: PackagePattern) -> Self {
        self.system_packages.push(pattern);
        self
    }

    /// Whether the system bundle serves `package`.
    #[must_use]
    pub fn is_system_package(&self, package: &str) -> bool {
        self.system_packages.iter().any(|p| p.matches(package))
    }
}
