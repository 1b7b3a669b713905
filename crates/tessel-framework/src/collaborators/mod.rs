//! Contracts the framework consumes from its embedding application.
//!
//! Metadata parsing, the resolution algorithm, persistent storage and
//! activation are all supplied from outside through these traits.

mod activator;
mod deploy;
mod environment;
mod resolver;
mod storage;

pub use activator::{Activator, ActivatorError, ActivatorFactory, BundleContext, NoActivators};
pub use deploy::{DeploymentError, DeploymentProvider};
pub use environment::{Environment, NoopEnvironment};
pub use resolver::{ResolutionError, ResolveRequest, ResolvedWires, Resolver};
pub use storage::{BundleStorage, InMemoryStorage};
