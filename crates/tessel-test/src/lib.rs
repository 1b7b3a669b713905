//! Tessel Test - Shared test utilities for the Tessel module runtime.
//!
//! This crate provides in-memory implementations of every collaborator the
//! framework consumes, bundle fixtures, and a harness that wires them
//! together.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tessel-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use tessel_core::{BundleState, LifecycleOptions};
//! use tessel_test::{BundleFixture, TestFramework};
//!
//! #[test]
//! fn test_start() {
//!     let t = TestFramework::launched();
//!     let id = t.install("mem:a", BundleFixture::host("a", "1.0.0"));
//!     t.framework.start(id, LifecycleOptions::NONE).unwrap();
//!     assert_eq!(t.framework.state(id), Some(BundleState::Active));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
