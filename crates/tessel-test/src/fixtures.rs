//! Bundle fixtures.

use std::sync::Arc;

use tessel_core::{BundleKind, Version, VersionRange};
use tessel_framework::{
    Capability, Content, DynamicImport, Namespace, PackagePattern, Requirement, RevisionDescriptor,
};

use crate::mocks::MemoryContent;

fn version(s: &str) -> Version {
    Version::parse(s).unwrap_or(Version::EMPTY)
}

fn range(s: &str) -> VersionRange {
    VersionRange::parse(s).unwrap_or(VersionRange::ANY)
}

/// Builder for the metadata and content of a test bundle.
///
/// Version and range strings that fail to parse fall back to the empty
/// version and the unbounded range.
#[derive(Debug, Clone)]
pub struct BundleFixture {
    descriptor: RevisionDescriptor,
    content: Arc<MemoryContent>,
}

impl BundleFixture {
    /// A host bundle. Provides the bundle and host capabilities for its
    /// symbolic name.
    #[must_use]
    pub fn host(name: &str, version_str: &str) -> Self {
        let v = version(version_str);
        Self::with_kind(
            name,
            v,
            BundleKind::Host,
            vec![
                Capability::new(Namespace::Bundle, name, v),
                Capability::new(Namespace::Host, name, v),
            ],
            Vec::new(),
        )
    }

    /// A fragment attaching to hosts named `host`.
    #[must_use]
    pub fn fragment(name: &str, version_str: &str, host: &str) -> Self {
        Self::with_kind(
            name,
            version(version_str),
            BundleKind::Fragment,
            Vec::new(),
            vec![Requirement::new(Namespace::Host, host, VersionRange::ANY)],
        )
    }

    fn with_kind(
        name: &str,
        version: Version,
        kind: BundleKind,
        capabilities: Vec<Capability>,
        requirements: Vec<Requirement>,
    ) -> Self {
        let content = Arc::new(MemoryContent::new());
        let shared: Arc<dyn Content> = content.clone();
        Self {
            descriptor: RevisionDescriptor {
                symbolic_name: name.to_owned(),
                version,
                kind,
                capabilities,
                requirements,
                dynamic_imports: Vec::new(),
                activator: None,
                lazy_activation: false,
                content: shared,
            },
            content,
        }
    }

    /// Export a package at a version.
    #[must_use]
    pub fn exports(mut self, package: &str, version_str: &str) -> Self {
        self.descriptor
            .capabilities
            .push(Capability::package(package, version(version_str)));
        self
    }

    /// Import a package from any exporter in `range_str`.
    #[must_use]
    pub fn imports(mut self, package: &str, range_str: &str) -> Self {
        self.descriptor
            .requirements
            .push(Requirement::package(package, range(range_str)));
        self
    }

    /// Import a package if an exporter is available.
    #[must_use]
    pub fn optionally_imports(mut self, package: &str) -> Self {
        self.descriptor
            .requirements
            .push(Requirement::package(package, VersionRange::ANY).optional());
        self
    }

    /// Require a whole bundle by symbolic name.
    #[must_use]
    pub fn requires_bundle(mut self, name: &str) -> Self {
        self.descriptor
            .requirements
            .push(Requirement::new(Namespace::Bundle, name, VersionRange::ANY));
        self
    }

    /// Declare a dynamic import. Malformed patterns are ignored.
    #[must_use]
    pub fn dynamic_import(mut self, pattern: &str) -> Self {
        if let Ok(pattern) = pattern.parse::<PackagePattern>() {
            self.descriptor.dynamic_imports.push(DynamicImport::new(pattern));
        }
        self
    }

    /// Declare a dynamic import restricted to exporter versions in
    /// `range_str`.
    #[must_use]
    pub fn dynamic_import_in(mut self, pattern: &str, range_str: &str) -> Self {
        if let Ok(pattern) = pattern.parse::<PackagePattern>() {
            self.descriptor.dynamic_imports.push(DynamicImport {
                pattern,
                version_range: range(range_str),
            });
        }
        self
    }

    /// Declare an activator.
    #[must_use]
    pub fn activator(mut self, name: &str) -> Self {
        self.descriptor.activator = Some(name.to_owned());
        self
    }

    /// Declare the lazy activation policy.
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.descriptor.lazy_activation = true;
        self
    }

    /// Add a content entry.
    #[must_use]
    pub fn entry(self, path: &str, data: &str) -> Self {
        self.content.insert(path, data.as_bytes());
        self
    }

    /// Add an empty class entry for `a.b.C`.
    #[must_use]
    pub fn class(self, class_name: &str) -> Self {
        let path = tessel_framework::package::class_path(class_name);
        self.entry(&path, class_name)
    }

    /// The fixture's content.
    #[must_use]
    pub fn content(&self) -> &Arc<MemoryContent> {
        &self.content
    }

    /// The descriptor handed to the framework.
    #[must_use]
    pub fn descriptor(&self) -> RevisionDescriptor {
        self.descriptor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_fixture_has_bundle_and_host_capabilities() {
        let d = BundleFixture::host("a", "1.2.3").descriptor();
        assert_eq!(d.version, Version::new(1, 2, 3));
        assert_eq!(d.kind, BundleKind::Host);
        let namespaces: Vec<_> = d.capabilities.iter().map(|c| c.namespace).collect();
        assert_eq!(namespaces, vec![Namespace::Bundle, Namespace::Host]);
    }

    #[test]
    fn test_fragment_fixture_requires_host() {
        let d = BundleFixture::fragment("f", "1.0.0", "h").descriptor();
        assert!(d.kind.is_fragment());
        assert_eq!(d.requirements[0].namespace, Namespace::Host);
        assert_eq!(d.requirements[0].name, "h");
    }

    #[test]
    fn test_class_entries_and_imports() {
        let fixture = BundleFixture::host("a", "1.0.0")
            .class("a.b.C")
            .imports("x.y", "[1.0,2.0)")
            .dynamic_import("z.*")
            .dynamic_import("bad..pattern");
        let d = fixture.descriptor();
        assert_eq!(d.content.entry("a/b/C.class"), Some(b"a.b.C".to_vec()));
        assert_eq!(d.requirements.len(), 1);
        assert_eq!(d.dynamic_imports.len(), 1);
    }
}
