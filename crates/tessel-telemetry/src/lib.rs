//! Tessel Telemetry - Logging and tracing for the Tessel module runtime.
//!
//! This crate provides:
//! - Configurable `tracing` subscriber setup with several output formats
//! - Rolling file output through `tracing-appender`
//! - Operation contexts that correlate the log lines of one bulk operation
//!
//! # Example
//!
//! ```rust,no_run
//! use tessel_telemetry::{LogConfig, LogFormat, OperationContext, setup_logging};
//!
//! # fn main() -> Result<(), tessel_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("tessel_framework::lock=debug");
//! setup_logging(&config)?;
//!
//! let _guard = OperationContext::new("refresh")
//!     .with_operation("refresh_bundles")
//!     .enter();
//! tracing::info!("Refreshing");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{OperationContext, OperationGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
