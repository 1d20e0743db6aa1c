//! Code matching against a dictionary, including the four in-plane rotations.

use crate::{DetectError, Dictionary};

/// A dictionary hit for an observed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub id: u32,
    /// Quarter turns `0..=3` with `observed == rotate_code_u64(code, n, rotation)`.
    pub rotation: u8,
    pub hamming: u8,
}

/// Brute-force matcher over all ids and rotations.
///
/// Rotated codes are precomputed once; families used for site markers are
/// small enough that a linear scan per candidate quad is cheap.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    pub fn new(dict: Dictionary, max_hamming: u8) -> Result<Self, DetectError> {
        dict.validate()?;
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&code| [0u8, 1, 2, 3].map(|r| rotate_code_u64(code, n, r)))
            .collect();

        Ok(Self {
            dict,
            max_hamming,
            rotated,
        })
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Closest code within `max_hamming`; ties keep the lowest id and rotation.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let limit = u32::from(self.max_hamming);
        self.rotated
            .iter()
            .enumerate()
            .flat_map(|(id, turns)| {
                turns
                    .iter()
                    .enumerate()
                    .map(move |(rot, &code)| ((observed ^ code).count_ones(), id, rot))
            })
            .filter(|&(distance, _, _)| distance <= limit)
            .min()
            .map(|(distance, id, rot)| Match {
                id: id as u32,
                rotation: rot as u8,
                hamming: distance as u8,
            })
    }
}

/// Rotate an `n × n` row-major code (`idx = y * n + x`) clockwise by `rot` quarter turns.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    (0..rot & 3).fold(code, |c, _| quarter_turn(c, n))
}

/// Cell `(x, y)` of the result takes cell `(y, n - 1 - x)` of the input.
fn quarter_turn(code: u64, n: usize) -> u64 {
    (0..n * n).fold(0, |out, idx| {
        let (y, x) = (idx / n, idx % n);
        let src = (n - 1 - x) * n + y;
        out | (((code >> src) & 1) << idx)
    })
}
