use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tessel_core::RevisionId;
use thiserror::Error;

use crate::revision::Revision;
use crate::wiring::Wire;

/// A batch resolution request.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Revisions that must all resolve, or the request fails.
    pub mandatory: Vec<Arc<Revision>>,
    /// Revisions to resolve if possible.
    pub optional: Vec<Arc<Revision>>,
    /// Every revision that may provide capabilities: the current revision
    /// of each installed bundle, plus everything already resolved.
    pub candidates: Vec<Arc<Revision>>,
    /// Revisions that already have a wiring.
    pub resolved: BTreeSet<RevisionId>,
}

impl ResolveRequest {
    /// Whether `revision` already has a wiring.
    #[must_use]
    pub fn is_resolved(&self, revision: RevisionId) -> bool {
        self.resolved.contains(&revision)
    }
}

/// Required wires for each newly resolved revision.
///
/// May include revisions that were neither mandatory nor optional but had
/// to be resolved as providers.
pub type ResolvedWires = BTreeMap<RevisionId, Vec<Wire>>;

/// A resolution that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResolutionError {
    /// The revision that could not be resolved, if known.
    pub revision: Option<RevisionId>,
    /// Human-readable cause, e.g. the unsatisfied requirement.
    pub message: String,
}

impl ResolutionError {
    /// A resolution error about one revision.
    #[must_use]
    pub fn new(revision: Option<RevisionId>, message: impl Into<String>) -> Self {
        Self {
            revision,
            message: message.into(),
        }
    }
}

/// Matches requirements to capabilities.
///
/// Implementations must be pure with respect to the framework: they read
/// the request and return wires, and never call back into the framework.
pub trait Resolver: Send + Sync {
    /// Resolve a batch.
    ///
    /// # Errors
    ///
    /// Returns an error if any mandatory revision cannot be resolved.
    fn resolve(&self, request: &ResolveRequest) -> Result<ResolvedWires, ResolutionError>;
}
