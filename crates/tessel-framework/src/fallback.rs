//! Dynamic-import fallback: on-demand lookup of classes and resources that
//! no static wire provides.
//!
//! Each resolved, non-fragment revision gets one [`FallbackResolver`]. A
//! lookup walks the currently resolved bundles, and searching a candidate
//! may run that candidate's own fallback. A [`LoadContext`] threaded through the
//! whole call chain stops the search from recursing on the same path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tessel_core::RevisionId;
use tracing::{debug, trace};

use crate::framework::Resource;
use crate::revision::{DynamicImport, Revision};

/// Paths being looked up by one outer load call.
#[derive(Debug, Default)]
pub(crate) struct LoadContext {
    in_flight: HashMap<String, usize>,
}

impl LoadContext {
    /// A context for a new top-level load.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark `path` in flight. Returns `true` only for the outermost entry.
    pub(crate) fn enter(&mut self, path: &str) -> bool {
        let count = self.in_flight.entry(path.to_owned()).or_insert(0);
        *count = count.saturating_add(1);
        *count == 1
    }

    /// Undo one [`enter`](Self::enter).
    pub(crate) fn exit(&mut self, path: &str) {
        if let Some(count) = self.in_flight.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(path);
            }
        }
    }

    /// How many nested lookups of `path` are in flight.
    #[cfg(test)]
    fn depth(&self, path: &str) -> usize {
        self.in_flight.get(path).copied().unwrap_or(0)
    }

    /// Whether no lookup is in flight.
    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// What a fallback search needs from the framework.
pub(crate) trait FallbackEnv {
    /// Current revisions of resolved, non-fragment, non-system bundles, by
    /// bundle id.
    fn resolved_candidates(&self) -> Vec<Arc<Revision>>;

    /// Whether the revision still has a wiring.
    fn is_resolved(&self, revision: RevisionId) -> bool;

    /// Whether `candidate` can serve `path`, using its full delegation
    /// (which may include its own fallback).
    fn search_candidate(
        &self,
        candidate: &Arc<Revision>,
        path: &str,
        ctx: &mut LoadContext,
    ) -> Option<Resource>;

    /// Try to resolve every installed, unresolved bundle.
    fn resolve_installed(&self);

    /// Whether the system bundle serves `package`.
    fn system_covers(&self, package: &str) -> bool;

    /// The system bundle's entry at `path`.
    fn system_entry(&self, path: &str) -> Option<Resource>;
}

#[derive(Debug)]
struct FallbackState {
    enabled: bool,
    cache: HashMap<String, Arc<Revision>>,
}

/// Dynamic-import lookup for one revision.
#[derive(Debug)]
pub(crate) struct FallbackResolver {
    revision: Arc<Revision>,
    state: Mutex<FallbackState>,
}

impl FallbackResolver {
    pub(crate) fn new(revision: Arc<Revision>) -> Self {
        Self {
            revision,
            state: Mutex::new(FallbackState {
                enabled: true,
                cache: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FallbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether lookups are still performed.
    pub(crate) fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Stop serving lookups and forget cached providers.
    pub(crate) fn disable(&self) {
        let mut state = self.state();
        state.enabled = false;
        state.cache.clear();
    }

    /// Provider currently cached for `package`.
    #[cfg(test)]
    fn cached_provider(&self, package: &str) -> Option<RevisionId> {
        self.state().cache.get(package).map(|r| r.id())
    }

    /// The dynamic import covering `package`, unless the revision exports
    /// the package itself.
    pub(crate) fn matching_import(&self, package: &str) -> Option<&DynamicImport> {
        if self.revision.exports(package) {
            return None;
        }
        self.revision
            .dynamic_imports()
            .iter()
            .find(|import| import.pattern.matches(package))
    }

    /// Look up `path` (in `package`) through the dynamic imports.
    ///
    /// Returns `None` when disabled, when no import matches, or when the same
    /// path is already being looked up further up the call chain.
    pub(crate) fn find(
        &self,
        env: &dyn FallbackEnv,
        path: &str,
        package: &str,
        ctx: &mut LoadContext,
    ) -> Option<Resource> {
        if !self.is_enabled() {
            return None;
        }
        let import = self.matching_import(package)?.clone();

        let first = ctx.enter(path);
        let found = if first {
            self.search(env, path, package, &import, ctx)
        } else {
            trace!(revision = %self.revision.id(), path, "Re-entrant fallback lookup short-circuited");
            None
        };
        ctx.exit(path);
        found
    }

    fn search(
        &self,
        env: &dyn FallbackEnv,
        path: &str,
        package: &str,
        import: &DynamicImport,
        ctx: &mut LoadContext,
    ) -> Option<Resource> {
        let cached = self.state().cache.get(package).cloned();
        if let Some(provider) = cached {
            if env.is_resolved(provider.id()) {
                if let Some(found) = env.search_candidate(&provider, path, ctx) {
                    return Some(found);
                }
            } else {
                self.state().cache.remove(package);
            }
        }

        if let Some(found) = self.scan(env, path, package, import, ctx) {
            return Some(found);
        }

        env.resolve_installed();
        if let Some(found) = self.scan(env, path, package, import, ctx) {
            return Some(found);
        }

        if env.system_covers(package) {
            return env.system_entry(path);
        }
        None
    }

    fn scan(
        &self,
        env: &dyn FallbackEnv,
        path: &str,
        package: &str,
        import: &DynamicImport,
        ctx: &mut LoadContext,
    ) -> Option<Resource> {
        for candidate in env.resolved_candidates() {
            if candidate.id() == self.revision.id() {
                continue;
            }
            let Some(found) = env.search_candidate(&candidate, path, ctx) else {
                continue;
            };
            if !candidate.exports_package(package, &import.version_range) {
                continue;
            }
            debug!(
                revision = %self.revision.id(),
                provider = %candidate.id(),
                package,
                "Dynamic import matched"
            );
            let mut state = self.state();
            if state.enabled {
                state.cache.insert(package.to_owned(), candidate);
            }
            return Some(found);
        }
        None
    }
}
