//! Fragment-to-host attachment and the content search order it implies.

use std::collections::HashMap;
use std::sync::Arc;

use tessel_core::{BundleId, BundleState, RevisionId};

use crate::registry::RegistryState;
use crate::revision::Revision;

/// Host ↔ fragment edges.
///
/// Each host keeps its fragments ordered by the fragment's owning bundle id,
/// then revision id. A fragment may be attached to several hosts.
#[derive(Debug, Default)]
pub(crate) struct Attachments {
    host_fragments: HashMap<RevisionId, Vec<(BundleId, RevisionId)>>,
    fragment_hosts: HashMap<RevisionId, Vec<RevisionId>>,
}

impl Attachments {
    pub(crate) fn attach(&mut self, fragment: &Revision, host: RevisionId) {
        let key = (fragment.bundle(), fragment.id());
        let fragments = self.host_fragments.entry(host).or_default();
        if let Err(pos) = fragments.binary_search(&key) {
            fragments.insert(pos, key);
        }
        let hosts = self.fragment_hosts.entry(fragment.id()).or_default();
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }

    pub(crate) fn fragments_of(&self, host: RevisionId) -> Vec<RevisionId> {
        self.host_fragments
            .get(&host)
            .map(|f| f.iter().map(|(_, rev)| *rev).collect())
            .unwrap_or_default()
    }

    pub(crate) fn hosts_of(&self, fragment: RevisionId) -> Vec<RevisionId> {
        self.fragment_hosts.get(&fragment).cloned().unwrap_or_default()
    }

    /// Detach every fragment from `host`. Returns the detached fragments.
    pub(crate) fn detach_host(&mut self, host: RevisionId) -> Vec<RevisionId> {
        let detached: Vec<RevisionId> = self
            .host_fragments
            .remove(&host)
            .map(|f| f.into_iter().map(|(_, rev)| rev).collect())
            .unwrap_or_default();
        for fragment in &detached {
            if let Some(hosts) = self.fragment_hosts.get_mut(fragment) {
                hosts.retain(|h| *h != host);
                if hosts.is_empty() {
                    self.fragment_hosts.remove(fragment);
                }
            }
        }
        detached
    }

    /// Detach `fragment` from every host.
    pub(crate) fn detach_fragment(&mut self, fragment: RevisionId) {
        for host in self.fragment_hosts.remove(&fragment).unwrap_or_default() {
            if let Some(fragments) = self.host_fragments.get_mut(&host) {
                fragments.retain(|(_, rev)| *rev != fragment);
                if fragments.is_empty() {
                    self.host_fragments.remove(&host);
                }
            }
        }
    }
}

fn is_uninstalled(state: &RegistryState, revision: &Revision) -> bool {
    state
        .state_of(revision.bundle())
        .is_none_or(|s| s == BundleState::Uninstalled)
}

/// Content search order for a host: its own content, then each attached
/// fragment that is not uninstalled, in attachment order.
pub(crate) fn host_search_order(state: &RegistryState, host: &Arc<Revision>) -> Vec<Arc<Revision>> {
    let mut order = vec![Arc::clone(host)];
    order.extend(
        state
            .attachments
            .fragments_of(host.id())
            .into_iter()
            .filter_map(|id| state.revisions.get(&id))
            .filter(|fragment| !is_uninstalled(state, fragment))
            .cloned(),
    );
    order
}

/// The host a resolved fragment delegates to: highest version first, then
/// lowest owning bundle id.
pub(crate) fn preferred_host(state: &RegistryState, fragment: RevisionId) -> Option<Arc<Revision>> {
    state
        .attachments
        .hosts_of(fragment)
        .into_iter()
        .filter_map(|id| state.revisions.get(&id))
        .max_by(|a, b| {
            a.version()
                .cmp(&b.version())
                .then_with(|| b.bundle().cmp(&a.bundle()))
        })
        .cloned()
}

/// Search order for a localization entry.
///
/// A resolved fragment searches its preferred host (unless that host is
/// uninstalled) and then its own content; an unresolved fragment only its own
/// content. A host uses [`host_search_order`].
pub(crate) fn localization_order(
    state: &RegistryState,
    revision: &Arc<Revision>,
) -> Vec<Arc<Revision>> {
    if !revision.is_fragment() {
        return host_search_order(state, revision);
    }
    let mut order = Vec::new();
    if state.is_wired(revision.id())
        && let Some(host) = preferred_host(state, revision.id())
        && !is_uninstalled(state, &host)
    {
        order = host_search_order(state, &host);
        order.retain(|r| r.id() != revision.id());
    }
    order.push(Arc::clone(revision));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{BundleKind, Version};

    use crate::revision::{EmptyContent, RevisionDescriptor};

    fn revision(id: u64, bundle: u64, kind: BundleKind, version: Version) -> Revision {
        Revision::new(
            RevisionId(id),
            BundleId(bundle),
            RevisionDescriptor {
                symbolic_name: format!("b{bundle}"),
                version,
                kind,
                capabilities: Vec::new(),
                requirements: Vec::new(),
                dynamic_imports: Vec::new(),
                activator: None,
                lazy_activation: false,
                content: Arc::new(EmptyContent),
            },
        )
    }

    #[test]
    fn test_fragments_ordered_by_bundle_id() {
        let mut attachments = Attachments::default();
        let f9 = revision(20, 9, BundleKind::Fragment, Version::EMPTY);
        let f3 = revision(21, 3, BundleKind::Fragment, Version::EMPTY);
        let f5 = revision(22, 5, BundleKind::Fragment, Version::EMPTY);
        for f in [&f9, &f3, &f5, &f3] {
            attachments.attach(f, RevisionId(1));
        }
        assert_eq!(
            attachments.fragments_of(RevisionId(1)),
            vec![RevisionId(21), RevisionId(22), RevisionId(20)]
        );
    }

    #[test]
    fn test_fragment_attached_to_many_hosts_detaches_per_host() {
        let mut attachments = Attachments::default();
        let f = revision(10, 4, BundleKind::Fragment, Version::EMPTY);
        attachments.attach(&f, RevisionId(1));
        attachments.attach(&f, RevisionId(2));
        assert_eq!(attachments.hosts_of(f.id()).len(), 2);

        assert_eq!(attachments.detach_host(RevisionId(1)), vec![f.id()]);
        assert_eq!(attachments.hosts_of(f.id()), vec![RevisionId(2)]);

        attachments.detach_fragment(f.id());
        assert!(attachments.hosts_of(f.id()).is_empty());
        assert!(attachments.fragments_of(RevisionId(2)).is_empty());
    }
}
