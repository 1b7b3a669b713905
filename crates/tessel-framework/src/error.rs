//! Framework error types.

use std::time::Duration;

use tessel_core::{BundleId, Version};
use thiserror::Error;

use crate::collaborators::{ActivatorError, DeploymentError, ResolutionError};
use crate::lock::LockItem;

/// Errors raised to the direct caller of a framework operation.
///
/// Failures the framework hits while driving a batch on its own (refresh,
/// start-level changes) are never returned here; they are fired as
/// framework error events instead.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// No bundle with this id is installed.
    #[error("Bundle not found: {0}")]
    BundleNotFound(BundleId),

    /// The bundle has already been uninstalled.
    #[error("Bundle {0} is uninstalled")]
    AlreadyUninstalled(BundleId),

    /// The locks for an operation could not be acquired in time.
    #[error("{method} timed out after {timeout:?} waiting for {}", render_items(.items))]
    LockTimeout {
        /// The operation that was blocked.
        method: &'static str,
        /// The items it asked for.
        items: Vec<LockItem>,
        /// How long it waited.
        timeout: Duration,
    },

    /// A required resolution failed.
    #[error("Bundle {bundle} could not be resolved: {source}")]
    Resolution {
        /// The bundle being resolved.
        bundle: BundleId,
        /// The resolver's error.
        #[source]
        source: ResolutionError,
    },

    /// The bundle's activator failed in its start or stop hook.
    #[error("Activator of bundle {bundle} failed: {source}")]
    ActivatorFailed {
        /// The bundle whose activator failed.
        bundle: BundleId,
        /// The activator's error.
        #[source]
        source: ActivatorError,
    },

    /// The declared activator could not be instantiated.
    #[error("Invalid activator '{activator}' for bundle {bundle}: {reason}")]
    InvalidActivator {
        /// The bundle.
        bundle: BundleId,
        /// The declared activator name.
        activator: String,
        /// Why it could not be created.
        reason: String,
    },

    /// The bundle was uninstalled while its activator was starting it.
    #[error("Bundle {0} was uninstalled during start")]
    UninstalledDuringStart(BundleId),

    /// The operation does not apply to this kind of bundle.
    #[error("{operation} is not supported: {reason}")]
    Unsupported {
        /// The rejected operation.
        operation: &'static str,
        /// Why.
        reason: String,
    },

    /// Start levels must be at least 1.
    #[error("Invalid start level: {0}")]
    InvalidStartLevel(u32),

    /// The deployment provider could not build a revision.
    #[error("Cannot deploy {location}: {source}")]
    Deployment {
        /// Bundle location.
        location: String,
        /// The provider's error.
        #[source]
        source: DeploymentError,
    },

    /// Another bundle already has this symbolic name and version.
    #[error("Bundle {symbolic_name} {version} is already installed as {existing}")]
    DuplicateBundle {
        /// Symbolic name.
        symbolic_name: String,
        /// Version.
        version: Version,
        /// The bundle that already has it.
        existing: BundleId,
    },

    /// The bundle is not in a state that allows the operation.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The start-level worker could not be reached.
    #[error("Start-level worker unavailable: {0}")]
    WorkerUnavailable(String),
}

fn render_items(items: &[LockItem]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for framework operations.
pub type FrameworkResult<T> = Result<T, FrameworkError>;
