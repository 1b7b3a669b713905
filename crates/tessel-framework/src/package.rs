//! Package names, package patterns and class/resource path mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A pattern over package names, as used by dynamic imports and the
/// system package list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PackagePattern {
    /// `*`: every package.
    Any,
    /// `a.b.*`: every sub-package of `a.b`, not `a.b` itself.
    Prefix(String),
    /// `a.b`: exactly that package.
    Exact(String),
}

impl PackagePattern {
    /// Whether `package` matches.
    #[must_use]
    pub fn matches(&self, package: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => name == package,
            Self::Prefix(prefix) => package
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1),
        }
    }

    /// The exact package name, if this pattern names one.
    #[must_use]
    pub fn exact(&self) -> Option<&str> {
        match self {
            Self::Exact(name) => Some(name),
            Self::Any | Self::Prefix(_) => None,
        }
    }
}

/// Error for a malformed package pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid package pattern: '{0}'")]
pub struct PatternError(pub String);

impl FromStr for PackagePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::Any);
        }
        let (name, prefix) = match s.strip_suffix(".*") {
            Some(name) => (name, true),
            None => (s, false),
        };
        if name.is_empty() || name.split('.').any(|seg| seg.is_empty() || seg.contains('*')) {
            return Err(PatternError(s.to_owned()));
        }
        Ok(if prefix {
            Self::Prefix(name.to_owned())
        } else {
            Self::Exact(name.to_owned())
        })
    }
}

impl TryFrom<String> for PackagePattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackagePattern> for String {
    fn from(pattern: PackagePattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for PackagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Prefix(p) => write!(f, "{p}.*"),
            Self::Exact(p) => f.write_str(p),
        }
    }
}

/// Content path of a class: `a.b.C` → `a/b/C.class`.
#[must_use]
pub fn class_path(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}

/// Package of a class: `a.b.C` → `a.b`, `C` → the default package `""`.
#[must_use]
pub fn class_package(class_name: &str) -> &str {
    class_name.rsplit_once('.').map_or("", |(pkg, _)| pkg)
}

/// Package of a resource: `a/b/x.txt` → `a.b`, `x.txt` → `""`.
#[must_use]
pub fn resource_package(path: &str) -> String {
    let path = normalize_path(path);
    path.rsplit_once('/')
        .map_or_else(String::new, |(dir, _)| dir.replace('/', "."))
}

/// Strip leading slashes from a resource path.
#[must_use]
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_parsing() {
        assert_eq!("*".parse::<PackagePattern>().unwrap(), PackagePattern::Any);
        assert_eq!(
            "a.b.*".parse::<PackagePattern>().unwrap(),
            PackagePattern::Prefix("a.b".into())
        );
        assert_eq!(
            "a.b".parse::<PackagePattern>().unwrap(),
            PackagePattern::Exact("a.b".into())
        );
        assert!("".parse::<PackagePattern>().is_err());
        assert!("a..b".parse::<PackagePattern>().is_err());
        assert!("a.*.b".parse::<PackagePattern>().is_err());
        assert!(".*".parse::<PackagePattern>().is_err());
    }

    #[test]
    fn test_prefix_matches_sub_packages_only() {
        let p = PackagePattern::Prefix("a".into());
        assert!(p.matches("a.b"));
        assert!(p.matches("a.b.c"));
        assert!(!p.matches("a"));
        assert!(!p.matches("ab.c"));
        assert!(PackagePattern::Any.matches(""));
        assert!(PackagePattern::Exact("a".into()).matches("a"));
        assert!(!PackagePattern::Exact("a".into()).matches("a.b"));
    }

    #[test]
    fn test_pattern_serde_as_string() {
        let json = serde_json::to_string(&PackagePattern::Prefix("x.y".into())).unwrap();
        assert_eq!(json, "\"x.y.*\"");
        let back: PackagePattern = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(back, PackagePattern::Any);
        assert!(serde_json::from_str::<PackagePattern>("\"a..b\"").is_err());
    }

    #[test]
    fn test_class_and_resource_mapping() {
        assert_eq!(class_path("a.b.C"), "a/b/C.class");
        assert_eq!(class_package("a.b.C"), "a.b");
        assert_eq!(class_package("C"), "");
        assert_eq!(resource_package("/a/b/x.txt"), "a.b");
        assert_eq!(resource_package("x.txt"), "");
        assert_eq!(normalize_path("//a/x"), "a/x");
    }
}
