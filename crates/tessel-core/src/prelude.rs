//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessel_core::prelude::*;` to import all essential types.

pub use crate::{
    BundleId, BundleKind, BundleState, LifecycleOptions, RevisionId, Version, VersionParseError,
    VersionRange,
};
