//! Share difficulty.

use std::fmt;

use bitcoin::pow::Target;

/// Mining difficulty relative to the difficulty-1 target.
///
/// Pools assign fractional difficulties to slow miners, so this is a float
/// rather than the integer multiplier used by ASIC firmware. A hash "meets"
/// a difficulty when its own difficulty is strictly greater.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Difficulty(f64);

impl Difficulty {
    pub const ZERO: Self = Self(0.0);

    /// Negative and NaN inputs become zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() || value < 0.0 {
            Self::ZERO
        } else {
            Self(value)
        }
    }

    /// Difficulty of a double-SHA-256 digest read as a little-endian integer.
    ///
    /// An all-zero digest yields infinity.
    pub fn from_hash(digest: &[u8; 32]) -> Self {
        Self(Target::from_le_bytes(*digest).difficulty_float())
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

impl From<Difficulty> for f64 {
    fn from(diff: Difficulty) -> Self {
        diff.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value < 1.0 {
            return write!(f, "{value}");
        }

        let (scaled, suffix) = if value >= 1e15 {
            (value / 1e15, "P")
        } else if value >= 1e12 {
            (value / 1e12, "T")
        } else if value >= 1e9 {
            (value / 1e9, "G")
        } else if value >= 1e6 {
            (value / 1e6, "M")
        } else if value >= 1e3 {
            (value / 1e3, "K")
        } else {
            (value, "")
        };

        if scaled >= 100.0 {
            write!(f, "{:.0}{}", scaled, suffix)
        } else if scaled >= 10.0 {
            write!(f, "{:.1}{}", scaled, suffix)
        } else {
            write!(f, "{:.2}{}", scaled, suffix)
        }
    }
}
