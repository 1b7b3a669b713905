//! Tessel Framework - the dynamic bundle runtime.
//!
//! This crate provides:
//! - A lock coordinator granting per-bundle and framework-wiring locks
//! - The bundle registry of revisions, wirings and fragment attachments
//! - The bundle lifecycle state machine (install, start, stop, update,
//!   uninstall)
//! - Dynamic-import fallback lookup for classes and resources
//! - Framework-wide refresh over the dependency closure
//! - A start-level controller driven by a dedicated worker thread
//!
//! # Architecture
//!
//! A [`Framework`] is one explicit runtime context. Metadata parsing,
//! resolution, persistence and activation are supplied by the embedding
//! application through the traits in [`collaborators`]; the framework owns
//! only the registry and the order in which things happen.
//!
//! Lifecycle operations run synchronously on the calling thread. The
//! registry lock is never held while events fire or collaborators run, so
//! activators and event subscribers may call back into the framework.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod collaborators;
pub mod config_bridge;
pub mod package;

mod error;
mod fallback;
mod fragment;
mod framework;
mod lock;
mod registry;
mod revision;
mod settings;
mod wiring;

pub use error::{FrameworkError, FrameworkResult};
pub use framework::{
    Framework, FrameworkBuilder, PendingChange, Resource, SYSTEM_BUNDLE_LOCATION,
    SYSTEM_BUNDLE_NAME, StartLevelController,
};
pub use lock::{LockContext, LockCoordinator, LockItem};
pub use package::{PackagePattern, PatternError};
pub use registry::{BundleInfo, BundleRegistry};
pub use revision::{Content, DynamicImport, EmptyContent, Revision, RevisionDescriptor};
pub use settings::FrameworkSettings;
pub use wiring::{Capability, Namespace, Requirement, Wire, Wiring};
