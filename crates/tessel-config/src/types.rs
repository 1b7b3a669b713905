//! Configuration types.
//!
//! Every section implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header yields a working config.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lock, start-level and system-package settings.
    pub framework: FrameworkSection,
    /// Event bus sizing.
    pub events: EventsSection,
    /// Logging level, format and per-module directives.
    pub logging: LoggingSection,
}

/// `[framework]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkSection {
    /// How long a lifecycle operation waits for its locks, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Start level the framework raises to on launch.
    pub beginning_start_level: u32,
    /// Start level assigned to newly installed bundles.
    pub initial_bundle_start_level: u32,
    /// Packages served by the system bundle. Entries ending in `.*` cover
    /// sub-packages.
    pub system_packages: Vec<String>,
    /// Discard persisted bundle state on launch.
    pub storage_clean: bool,
}

impl Default for FrameworkSection {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            beginning_start_level: 1,
            initial_bundle_start_level: 1,
            system_packages: vec!["tessel.framework".into(), "tessel.framework.*".into()],
            storage_clean: false,
        }
    }
}

/// `[events]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Broadcast channel capacity of the event bus.
    pub channel_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Extra directives (e.g. `["tessel_framework::lock=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            directives: Vec::new(),
        }
    }
}
