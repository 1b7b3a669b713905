//! Tessel Core - Foundation types for the Tessel dynamic module runtime.
//!
//! This crate provides:
//! - Bundle and revision identifiers
//! - Semantic versions and version ranges used for capability matching
//! - The bundle lifecycle state and bundle kind enums
//! - The bit-exact lifecycle option mask accepted by `start`/`stop`

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod ids;
pub mod options;
pub mod state;
pub mod version;

pub use ids::{BundleId, RevisionId};
pub use options::LifecycleOptions;
pub use state::{BundleKind, BundleState};
pub use version::{Version, VersionParseError, VersionRange};
