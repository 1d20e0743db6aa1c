//! Tag family metadata and packed codes.

use serde::{Deserialize, Serialize};

use crate::DetectError;

/// A square fiducial family supplied as data.
///
/// Families are not generated here; they are loaded from JSON (or built
/// inline) and validated once before a detector is constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Human-readable family name, e.g. `"tag16h5"`.
    pub name: String,
    /// Number of payload bits per side, excluding the black border.
    pub marker_size: usize,
    /// Largest Hamming distance the family can correct.
    pub max_correction_bits: u8,
    /// One code per tag id: `marker_size²` bits, row-major, **black = 1**.
    pub codes: Vec<u64>,
}

impl Dictionary {
    pub fn new(
        name: impl Into<String>,
        marker_size: usize,
        max_correction_bits: u8,
        codes: Vec<u64>,
    ) -> Result<Self, DetectError> {
        let dict = Self {
            name: name.into(),
            marker_size,
            max_correction_bits,
            codes,
        };
        dict.validate()?;
        Ok(dict)
    }

    /// Total number of payload bits per tag.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn code(&self, id: u32) -> Option<u64> {
        self.codes.get(id as usize).copied()
    }

    /// Check the family is decodable: non-empty, fits in 64 bits, no stray high bits.
    pub fn validate(&self) -> Result<(), DetectError> {
        let bits = self.bit_count();
        if self.marker_size == 0 || bits > 64 {
            return Err(DetectError::InvalidDictionary(format!(
                "{}: marker_size {} implies {} payload bits (supported: 1..=64)",
                self.name, self.marker_size, bits
            )));
        }
        if self.codes.is_empty() {
            return Err(DetectError::InvalidDictionary(format!(
                "{}: no codes",
                self.name
            )));
        }
        if bits < 64 {
            let mask = (1u64 << bits) - 1;
            if let Some(id) = self.codes.iter().position(|&c| c & !mask != 0) {
                return Err(DetectError::InvalidDictionary(format!(
                    "{}: code for id {id} has bits above {bits}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
