//! Versions and version ranges.
//!
//! Bundles and package capabilities carry a [`Version`]; requirements and
//! dynamic imports constrain candidates with a [`VersionRange`].

use std::cmp::Ordering;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Semantic version following semver conventions.
///
/// Missing trailing segments default to zero, so `"1"` and `"1.0.0"` are
/// the same version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version - breaking changes
    pub major: u32,
    /// Minor version - new features, backwards compatible
    pub minor: u32,
    /// Patch version - bug fixes, backwards compatible
    pub patch: u32,
}

impl Version {
    /// The empty version `0.0.0`.
    pub const EMPTY: Self = Self::new(0, 0, 0);

    /// Creates a new version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version from a string like `"1.2.3"`, `"1.2"` or `"1"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string has more than three segments or a
    /// segment is not a number.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        s.parse()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

/// Error returned when parsing a version or version range fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    /// Wrong number of segments (expected at most "major.minor.patch").
    #[error("invalid version format: {0} (expected major[.minor[.patch]])")]
    InvalidFormat(String),
    /// A numeric segment could not be parsed.
    #[error("invalid version number: {0}")]
    InvalidNumber(#[from] ParseIntError),
    /// A range string is malformed.
    #[error("invalid version range: {0}")]
    InvalidRange(String),
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::InvalidFormat(s.to_owned()));
        }
        let mut parts = trimmed.split('.');
        let major = parts.next().unwrap_or("0").parse()?;
        let minor = parts.next().map_or(Ok(0), str::parse)?;
        let patch = parts.next().map_or(Ok(0), str::parse)?;
        if parts.next().is_some() {
            return Err(VersionParseError::InvalidFormat(s.to_owned()));
        }
        Ok(Self::new(major, minor, patch))
    }
}

/// An interval of versions.
///
/// Written either as a bare version (`"1.2"`, meaning *at least* 1.2.0) or in
/// interval notation (`"[1.0,2.0)"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRange {
    /// Lower bound.
    pub floor: Version,
    /// Whether the lower bound is included.
    pub floor_inclusive: bool,
    /// Upper bound, unbounded if `None`.
    pub ceiling: Option<Version>,
    /// Whether the upper bound is included.
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// The range that accepts every version.
    pub const ANY: Self = Self::at_least(Version::EMPTY);

    /// A range accepting `floor` and everything above it.
    #[must_use]
    pub const fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// A range accepting exactly one version.
    #[must_use]
    pub const fn exactly(version: Version) -> Self {
        Self {
            floor: version,
            floor_inclusive: true,
            ceiling: Some(version),
            ceiling_inclusive: true,
        }
    }

    /// Whether `version` lies inside the range.
    #[must_use]
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            *version >= self.floor
        } else {
            *version > self.floor
        };
        let below_ceiling = match &self.ceiling {
            None => true,
            Some(c) if self.ceiling_inclusive => version <= c,
            Some(c) => version < c,
        };
        above_floor && below_ceiling
    }

    /// Parse a range string.
    ///
    /// # Errors
    ///
    /// Returns an error if the brackets, separator or versions are malformed.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        s.parse()
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::ANY
    }
}

impl FromStr for VersionRange {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some(open) = trimmed.chars().next() else {
            return Err(VersionParseError::InvalidRange(s.to_owned()));
        };
        if open != '[' && open != '(' {
            return Ok(Self::at_least(trimmed.parse()?));
        }
        let Some(close) = trimmed.chars().last() else {
            return Err(VersionParseError::InvalidRange(s.to_owned()));
        };
        if close != ']' && close != ')' {
            return Err(VersionParseError::InvalidRange(s.to_owned()));
        }
        let inner = trimmed
            .get(1..trimmed.len().saturating_sub(1))
            .ok_or_else(|| VersionParseError::InvalidRange(s.to_owned()))?;
        let (low, high) = inner
            .split_once(',')
            .ok_or_else(|| VersionParseError::InvalidRange(s.to_owned()))?;
        let floor: Version = low.parse()?;
        let ceiling: Version = high.parse()?;
        if ceiling < floor {
            return Err(VersionParseError::InvalidRange(s.to_owned()));
        }
        Ok(Self {
            floor,
            floor_inclusive: open == '[',
            ceiling: Some(ceiling),
            ceiling_inclusive: close == ']',
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some(c) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                c,
                if self.ceiling_inclusive { ']' } else { ')' }
            ),
        }
    }
}
