//! Miner-chosen extranonce2 counter.
//!
//! The pool fixes the width of extranonce2 in its subscribe reply. The value
//! is spliced into the coinbase as little-endian bytes of that width, and the
//! same bytes, hex encoded, go back in `mining.submit`.

use std::fmt;

use thiserror::Error;

/// Fixed-width extranonce2 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extranonce2 {
    value: u64,
    size: u8,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Extranonce2Error {
    #[error("Invalid extranonce2 size: {0} (must be 1-8 bytes)")]
    InvalidSize(u64),

    #[error("Extranonce2 value {value:#x} does not fit in {size} bytes")]
    ValueTooLarge { value: u64, size: u8 },
}

impl Extranonce2 {
    /// Zero-valued extranonce2 of the pool-assigned width.
    pub fn new(size: u64) -> Result<Self, Extranonce2Error> {
        Self::with_value(0, size)
    }

    pub fn with_value(value: u64, size: u64) -> Result<Self, Extranonce2Error> {
        if size == 0 || size > 8 {
            return Err(Extranonce2Error::InvalidSize(size));
        }
        let ext = Self {
            value,
            size: size as u8,
        };
        if value > ext.max_value() {
            return Err(Extranonce2Error::ValueTooLarge {
                value,
                size: ext.size,
            });
        }
        Ok(ext)
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    /// Advance to the next value, wrapping to zero past the maximum.
    pub fn increment(&mut self) {
        self.value = if self.value < self.max_value() {
            self.value + 1
        } else {
            0
        };
    }

    pub fn max_value(&self) -> u64 {
        if self.size >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.size * 8)) - 1
        }
    }

    /// Append the coinbase bytes of this value.
    pub fn extend_vec(&self, vec: &mut Vec<u8>) {
        vec.extend_from_slice(&self.value.to_le_bytes()[..self.size as usize]);
    }
}

impl From<Extranonce2> for Vec<u8> {
    fn from(ext: Extranonce2) -> Vec<u8> {
        ext.value.to_le_bytes()[..ext.size as usize].to_vec()
    }
}

/// Hex of the coinbase bytes, as sent in `mining.submit`.
impl fmt::Display for Extranonce2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.value.to_le_bytes()[..self.size as usize] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
