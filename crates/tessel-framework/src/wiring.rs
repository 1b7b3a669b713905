//! Capabilities, requirements, wires and wirings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tessel_core::{RevisionId, Version, VersionRange};

/// What a capability or requirement is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// A package of classes and resources.
    Package,
    /// A whole bundle, by symbolic name.
    Bundle,
    /// Fragment-to-host attachment, by host symbolic name.
    Host,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Package => "package",
            Self::Bundle => "bundle",
            Self::Host => "host",
        })
    }
}

/// Something a revision provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Namespace.
    pub namespace: Namespace,
    /// Package name or symbolic name.
    pub name: String,
    /// Version of what is provided.
    pub version: Version,
    /// Extra matching attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Capability {
    /// A capability without attributes.
    #[must_use]
    pub fn new(namespace: Namespace, name: impl Into<String>, version: Version) -> Self {
        Self {
            namespace,
            name: name.into(),
            version,
            attributes: BTreeMap::new(),
        }
    }

    /// An exported package.
    #[must_use]
    pub fn package(name: impl Into<String>, version: Version) -> Self {
        Self::new(Namespace::Package, name, version)
    }

    /// Add a matching attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{};{}", self.namespace, self.name, self.version)
    }
}

/// Something a revision needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Namespace.
    pub namespace: Namespace,
    /// Package name or symbolic name.
    pub name: String,
    /// Acceptable versions.
    pub version_range: VersionRange,
    /// Attributes the capability must carry with equal values.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Whether resolution may succeed without a provider.
    #[serde(default)]
    pub optional: bool,
}

impl Requirement {
    /// A mandatory requirement.
    #[must_use]
    pub fn new(namespace: Namespace, name: impl Into<String>, version_range: VersionRange) -> Self {
        Self {
            namespace,
            name: name.into(),
            version_range,
            attributes: BTreeMap::new(),
            optional: false,
        }
    }

    /// A mandatory package import.
    #[must_use]
    pub fn package(name: impl Into<String>, version_range: VersionRange) -> Self {
        Self::new(Namespace::Package, name, version_range)
    }

    /// Mark the requirement optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Whether `capability` satisfies this requirement.
    #[must_use]
    pub fn matches(&self, capability: &Capability) -> bool {
        self.namespace == capability.namespace
            && self.name == capability.name
            && self.version_range.includes(&capability.version)
            && self
                .attributes
                .iter()
                .all(|(k, v)| capability.attributes.get(k) == Some(v))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{};{}", self.namespace, self.name, self.version_range)?;
        if self.optional {
            f.write_str(";optional")?;
        }
        Ok(())
    }
}

/// A resolved dependency edge from a provider revision to a requirer revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wire {
    /// Revision providing the capability.
    pub provider: RevisionId,
    /// Revision whose requirement is satisfied.
    pub requirer: RevisionId,
    /// The capability used.
    pub capability: Capability,
    /// The requirement it satisfies.
    pub requirement: Requirement,
}

impl Wire {
    /// Whether this wire imports `package`.
    #[must_use]
    pub fn imports_package(&self, package: &str) -> bool {
        self.capability.namespace == Namespace::Package && self.capability.name == package
    }
}

/// The resolved wires of one revision.
///
/// Created once when the revision resolves. Afterwards only `provided`
/// grows, as other revisions resolve against this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wiring {
    revision: RevisionId,
    required: Vec<Wire>,
    provided: Vec<Wire>,
}

impl Wiring {
    pub(crate) fn new(revision: RevisionId, required: Vec<Wire>) -> Self {
        Self {
            revision,
            required,
            provided: Vec::new(),
        }
    }

    /// The revision this wiring belongs to.
    #[must_use]
    pub fn revision(&self) -> RevisionId {
        self.revision
    }

    /// Wires to this revision's providers.
    #[must_use]
    pub fn required(&self) -> &[Wire] {
        &self.required
    }

    /// Wires to revisions that depend on this one.
    #[must_use]
    pub fn provided(&self) -> &[Wire] {
        &self.provided
    }

    pub(crate) fn add_provided(&mut self, wire: Wire) {
        if !self.provided.contains(&wire) {
            self.provided.push(wire);
        }
    }

    pub(crate) fn forget_requirer(&mut self, requirer: RevisionId) {
        self.provided.retain(|w| w.requirer != requirer);
    }

    pub(crate) fn forget_provider(&mut self, provider: RevisionId) {
        self.required.retain(|w| w.provider != provider);
    }

    /// The provider wired for `package`, if imported statically.
    #[must_use]
    pub fn package_provider(&self, package: &str) -> Option<RevisionId> {
        self.required
            .iter()
            .find(|w| w.imports_package(package))
            .map(|w| w.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_matching() {
        let cap = Capability::package("a.b", Version::new(1, 5, 0)).with_attribute("vendor", "acme");
        let req = Requirement::package("a.b", VersionRange::parse("[1.0,2.0)").unwrap());
        assert!(req.matches(&cap));

        let too_new = Requirement::package("a.b", VersionRange::parse("2.0").unwrap());
        assert!(!too_new.matches(&cap));

        let other_ns = Requirement::new(Namespace::Bundle, "a.b", VersionRange::ANY);
        assert!(!other_ns.matches(&cap));

        let mut attr = Requirement::package("a.b", VersionRange::ANY);
        attr.attributes.insert("vendor".into(), "other".into());
        assert!(!attr.matches(&cap));
    }

    #[test]
    fn test_wiring_bookkeeping() {
        let cap = Capability::package("p", Version::EMPTY);
        let req = Requirement::package("p", VersionRange::ANY);
        let wire = Wire {
            provider: RevisionId(1),
            requirer: RevisionId(2),
            capability: cap,
            requirement: req,
        };

        let mut provider = Wiring::new(RevisionId(1), Vec::new());
        provider.add_provided(wire.clone());
        provider.add_provided(wire.clone());
        assert_eq!(provider.provided().len(), 1);

        let mut requirer = Wiring::new(RevisionId(2), vec![wire]);
        assert_eq!(requirer.package_provider("p"), Some(RevisionId(1)));
        assert_eq!(requirer.package_provider("q"), None);

        provider.forget_requirer(RevisionId(2));
        requirer.forget_provider(RevisionId(1));
        assert!(provider.provided().is_empty());
        assert!(requirer.required().is_empty());
    }

    #[test]
    fn test_display() {
        let req = Requirement::package("a", VersionRange::ANY).optional();
        assert_eq!(req.to_string(), "package:a;0.0.0;optional");
        let cap = Capability::new(Namespace::Host, "h", Version::new(2, 0, 0));
        assert_eq!(cap.to_string(), "host:h;2.0.0");
    }
}
