//! Revisions: immutable snapshots of a bundle's content and metadata.

use std::fmt;
use std::sync::Arc;

use tessel_core::{BundleId, BundleKind, RevisionId, Version, VersionRange};

use crate::package::PackagePattern;
use crate::wiring::{Capability, Namespace, Requirement};

/// Read access to a revision's entries (classes and resources).
pub trait Content: Send + Sync + fmt::Debug {
    /// The bytes stored at `path`, if any.
    fn entry(&self, path: &str) -> Option<Vec<u8>>;

    /// Release underlying resources. Called once when the revision is
    /// disposed.
    fn close(&self) {}
}

/// Content with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContent;

impl Content for EmptyContent {
    fn entry(&self, _path: &str) -> Option<Vec<u8>> {
        None
    }
}

/// A declared dynamic import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicImport {
    /// Which packages it covers.
    pub pattern: PackagePattern,
    /// Which exporter versions are acceptable.
    pub version_range: VersionRange,
}

impl DynamicImport {
    /// A dynamic import accepting any version.
    #[must_use]
    pub fn new(pattern: PackagePattern) -> Self {
        Self {
            pattern,
            version_range: VersionRange::ANY,
        }
    }
}

/// Everything the deployment provider extracts from bundle content.
#[derive(Debug, Clone)]
pub struct RevisionDescriptor {
    /// Symbolic name.
    pub symbolic_name: String,
    /// Bundle version.
    pub version: Version,
    /// `Host` or `Fragment`.
    pub kind: BundleKind,
    /// Declared capabilities.
    pub capabilities: Vec<Capability>,
    /// Declared requirements. Fragments declare a `Host` requirement.
    pub requirements: Vec<Requirement>,
    /// Dynamic imports, searched on a load miss.
    pub dynamic_imports: Vec<DynamicImport>,
    /// Activator name, resolved by the activator factory.
    pub activator: Option<String>,
    /// Whether the bundle declares a lazy activation policy.
    pub lazy_activation: bool,
    /// The revision's entries.
    pub content: Arc<dyn Content>,
}

/// One immutable install or update snapshot of a bundle.
#[derive(Debug)]
pub struct Revision {
    id: RevisionId,
    bundle: BundleId,
    descriptor: RevisionDescriptor,
}

impl Revision {
    pub(crate) fn new(id: RevisionId, bundle: BundleId, descriptor: RevisionDescriptor) -> Self {
        Self {
            id,
            bundle,
            descriptor,
        }
    }

    /// Revision id.
    #[must_use]
    pub fn id(&self) -> RevisionId {
        self.id
    }

    /// Owning bundle.
    #[must_use]
    pub fn bundle(&self) -> BundleId {
        self.bundle
    }

    /// Symbolic name.
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.descriptor.symbolic_name
    }

    /// Version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.descriptor.version
    }

    /// Bundle kind.
    #[must_use]
    pub fn kind(&self) -> BundleKind {
        self.descriptor.kind
    }

    /// Whether this is a fragment revision.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.descriptor.kind.is_fragment()
    }

    /// Declared capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.descriptor.capabilities
    }

    /// Declared requirements.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.descriptor.requirements
    }

    /// Declared dynamic imports.
    #[must_use]
    pub fn dynamic_imports(&self) -> &[DynamicImport] {
        &self.descriptor.dynamic_imports
    }

    /// Declared activator name.
    #[must_use]
    pub fn activator(&self) -> Option<&str> {
        self.descriptor.activator.as_deref()
    }

    /// Whether the revision declares lazy activation.
    #[must_use]
    pub fn lazy_activation(&self) -> bool {
        self.descriptor.lazy_activation
    }

    /// The revision's content.
    #[must_use]
    pub fn content(&self) -> &Arc<dyn Content> {
        &self.descriptor.content
    }

    /// Whether the revision exports `package` at a version in `range`.
    #[must_use]
    pub fn exports_package(&self, package: &str, range: &VersionRange) -> bool {
        self.descriptor.capabilities.iter().any(|c| {
            c.namespace == Namespace::Package && c.name == package && range.includes(&c.version)
        })
    }

    /// Whether the revision exports `package` at all.
    #[must_use]
    pub fn exports(&self, package: &str) -> bool {
        self.exports_package(package, &VersionRange::ANY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> RevisionDescriptor {
        RevisionDescriptor {
            symbolic_name: "a".into(),
            version: Version::new(1, 0, 0),
            kind: BundleKind::Host,
            capabilities: vec![Capability::package("a.api", Version::new(1, 2, 0))],
            requirements: Vec::new(),
            dynamic_imports: vec![DynamicImport::new(PackagePattern::Any)],
            activator: Some("a.Activator".into()),
            lazy_activation: false,
            content: Arc::new(EmptyContent),
        }
    }

    #[test]
    fn test_exports_package_respects_range() {
        let rev = Revision::new(RevisionId(1), BundleId(1), descriptor());
        assert!(rev.exports("a.api"));
        assert!(rev.exports_package("a.api", &VersionRange::parse("[1.0,2.0)").unwrap()));
        assert!(!rev.exports_package("a.api", &VersionRange::parse("1.3").unwrap()));
        assert!(!rev.exports("a.impl"));
    }

    #[test]
    fn test_accessors() {
        let rev = Revision::new(RevisionId(7), BundleId(3), descriptor());
        assert_eq!(rev.id(), RevisionId(7));
        assert_eq!(rev.bundle(), BundleId(3));
        assert_eq!(rev.symbolic_name(), "a");
        assert_eq!(rev.activator(), Some("a.Activator"));
        assert!(!rev.is_fragment());
        assert_eq!(rev.dynamic_imports().len(), 1);
        assert!(rev.content().entry("x").is_none());
    }
}
