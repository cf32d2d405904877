//! Additive checksum of P300 telegrams

use crate::error::{OptolinkError, OptolinkResult};

/// Checksum calculator
///
/// The checksum is the sum of every telegram byte after the start marker,
/// modulo 256.
#[derive(Debug, Clone, Default)]
pub struct ChecksumCalc {
    sum: u8,
}

impl ChecksumCalc {
    /// Create a new checksum calculator
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the checksum to its initial state
    pub fn reset(&mut self) {
        self.sum = 0;
    }

    /// Update the checksum with a single byte
    pub fn update(&mut self, data: u8) {
        self.sum = self.sum.wrapping_add(data);
    }

    /// Update the checksum with multiple bytes
    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Get the current checksum value
    pub fn value(&self) -> u8 {
        self.sum
    }

    /// Validate the current checksum against a received one
    pub fn validate(&self, received: u8) -> OptolinkResult<()> {
        if self.sum != received {
            Err(OptolinkError::FrameCorrupt(format!(
                "Checksum has wrong value: 0x{:02X}, expected 0x{:02X}",
                received, self.sum
            )))
        } else {
            Ok(())
        }
    }

    /// Checksum of a complete byte run
    pub fn of(data: &[u8]) -> u8 {
        let mut calc = Self::new();
        calc.update_bytes(data);
        calc.value()
    }
}
