//! Prelude module - commonly used test utilities.
//!
//! Use `use tessel_test::prelude::*;` to import all essential helpers.

pub use crate::{
    BundleFixture, EnvironmentCall, MatchingResolver, MemoryContent, MemoryDeployment,
    RecordingEnvironment, RecordingSubscriber, ScriptedActivator, ScriptedActivatorFactory,
    TestFramework, init_test_logging,
};
