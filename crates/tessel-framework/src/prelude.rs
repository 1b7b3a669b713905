//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessel_framework::prelude::*;` to import all essential types.

pub use crate::collaborators::{
    Activator, ActivatorError, ActivatorFactory, BundleContext, BundleStorage, DeploymentError,
    DeploymentProvider, Environment, ResolutionError, ResolveRequest, ResolvedWires, Resolver,
};
pub use crate::{
    BundleInfo, Capability, Content, Framework, FrameworkError, FrameworkResult,
    FrameworkSettings, LockItem, Namespace, PackagePattern, Requirement, Resource, Revision,
    RevisionDescriptor, Wire, Wiring,
};
