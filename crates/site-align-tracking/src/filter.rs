//! Exponential smoothing of a pose with a sample-count and dispersion gate.

use std::collections::VecDeque;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Updates required before a filter can become confident.
pub const MIN_CONFIDENT_SAMPLES: usize = 5;
/// Raw positions kept for the dispersion estimate.
pub const SAMPLE_CAPACITY: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Weight of the newest sample, clamped to `[0, 1]`.
    pub smoothing_factor: f64,
    /// Largest accepted standard deviation of the buffered positions, in
    /// position units.
    pub dispersion_threshold: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.1,
            dispersion_threshold: 0.05,
        }
    }
}

/// EMA filter over position and orientation.
///
/// Position is blended linearly, orientation by shortest-path slerp. The
/// filter reports confidence once it has seen [`MIN_CONFIDENT_SAMPLES`] updates
/// and the last [`SAMPLE_CAPACITY`] raw positions have a population standard
/// deviation (distance to their mean) within the dispersion threshold.
#[derive(Clone, Debug)]
pub struct PoseFilter {
    alpha: f64,
    dispersion_threshold: f64,
    state: Option<(Vector3<f64>, UnitQuaternion<f64>)>,
    samples: VecDeque<Vector3<f64>>,
    sample_count: usize,
    dispersion: Option<f64>,
    confident: bool,
}

impl PoseFilter {
    pub fn new(params: FilterParams) -> Self {
        let alpha = if params.smoothing_factor.is_nan() {
            0.0
        } else {
            params.smoothing_factor.clamp(0.0, 1.0)
        };
        Self {
            alpha,
            dispersion_threshold: params.dispersion_threshold,
            state: None,
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            sample_count: 0,
            dispersion: None,
            confident: false,
        }
    }

    pub fn update(&mut self, position: Vector3<f64>, rotation: UnitQuaternion<f64>) {
        self.state = Some(match self.state {
            None => (position, rotation),
            Some((p, q)) => (
                position * self.alpha + p * (1.0 - self.alpha),
                slerp_shortest(&q, &rotation, self.alpha),
            ),
        });

        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(position);
        self.sample_count += 1;

        if self.sample_count < MIN_CONFIDENT_SAMPLES {
            self.confident = false;
            return;
        }
        let std_dev = population_std_dev(&self.samples);
        self.dispersion = Some(std_dev);
        self.confident = std_dev <= self.dispersion_threshold;
    }

    #[inline]
    pub fn is_confident(&self) -> bool {
        self.confident
    }

    pub fn filtered_position(&self) -> Option<Vector3<f64>> {
        self.state.map(|(p, _)| p)
    }

    pub fn filtered_rotation(&self) -> Option<UnitQuaternion<f64>> {
        self.state.map(|(_, q)| q)
    }

    /// Total number of updates, including samples already evicted.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Standard deviation from the last confidence check.
    pub fn dispersion(&self) -> Option<f64> {
        self.dispersion
    }

    pub fn smoothing_factor(&self) -> f64 {
        self.alpha
    }
}

fn population_std_dev(samples: &VecDeque<Vector3<f64>>) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<Vector3<f64>>() / n;
    let sum_sq: f64 = samples.iter().map(|p| (p - mean).norm_squared()).sum();
    (sum_sq / n).sqrt()
}

fn slerp_shortest(
    from: &UnitQuaternion<f64>,
    to: &UnitQuaternion<f64>,
    t: f64,
) -> UnitQuaternion<f64> {
    let to = if from.coords.dot(&to.coords) < 0.0 {
        UnitQuaternion::new_unchecked(-to.into_inner())
    } else {
        *to
    };
    // Nearly equal inputs have no well-defined slerp arc.
    from.try_slerp(&to, t, 1e-9)
        .unwrap_or_else(|| from.nlerp(&to, t))
}
