//! Lifecycle option flags accepted by `start` and `stop`.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Bitmask of lifecycle options.
///
/// The bit values are part of the public API and must not change:
/// `TRANSIENT = 0x1`, `ACTIVATION_POLICY = 0x2` (start only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LifecycleOptions(u32);

impl LifecycleOptions {
    /// No options: persistent start/stop, eager activation.
    pub const NONE: Self = Self(0);
    /// Do not persist the "should start" intent.
    pub const TRANSIENT: Self = Self(0x1);
    /// Honour the revision's declared activation policy (lazy activation).
    pub const ACTIVATION_POLICY: Self = Self(0x2);

    /// Build options from raw bits. Unknown bits are kept but ignored.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the transient bit is set.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.contains(Self::TRANSIENT)
    }

    /// Whether the activation-policy bit is set.
    #[must_use]
    pub const fn uses_activation_policy(self) -> bool {
        self.contains(Self::ACTIVATION_POLICY)
    }
}

impl BitOr for LifecycleOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for LifecycleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
