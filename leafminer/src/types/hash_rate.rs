//! Hashrate measurement type.

use std::fmt;
use std::time::Duration;

/// Hashes per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HashRate(pub u64);

impl HashRate {
    /// Rate from a hash count accumulated over `elapsed`.
    pub fn from_hashes(hashes: u64, elapsed: Duration) -> Self {
        let nanos = elapsed.as_nanos();
        if nanos == 0 {
            return Self(0);
        }
        Self((hashes as u128 * 1_000_000_000 / nanos) as u64)
    }

    pub fn as_kilohashes(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn as_megahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Format as human-readable string with appropriate units
    pub fn to_human_readable(&self) -> String {
        if self.0 >= 1_000_000 {
            format!("{:.2} MH/s", self.as_megahashes())
        } else if self.0 >= 1_000 {
            format!("{:.2} kH/s", self.as_kilohashes())
        } else {
            format!("{} H/s", self.0)
        }
    }
}

impl From<u64> for HashRate {
    fn from(hashes_per_second: u64) -> Self {
        Self(hashes_per_second)
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}
