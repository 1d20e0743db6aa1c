//! The detector seam and its default quad-based implementation.

use std::collections::HashSet;

use log::debug;
use nalgebra::Point2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use site_align_core::{homography_from_4pt, GrayImage, GrayImageView, Homography, TimeProfile};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::decode::{read_code, tag_square, SampleGrid};
use crate::quad::{adaptive_threshold, dark_components, decimate_into, fit_quad, QuadLimits, TileScratch};
use crate::{DetectError, Dictionary, Matcher};

/// Smallest decimated frame side the detector accepts.
const MIN_DECIMATED_SIDE: usize = 8;

/// One decoded tag in full-resolution pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub id: u32,
    /// Corrected bits.
    pub hamming: u8,
    /// Border darkness scaled by the Hamming penalty, in `[0, 1]`.
    pub score: f32,
    /// Outer border corners in the tag's own order TL, TR, BR, BL.
    pub corners: [Point2<f32>; 4],
    pub center: Point2<f32>,
    /// Maps the tag square `[-1, 1]²` (TL = `(-1, -1)`) to pixels.
    pub homography: Homography,
}

/// Anything that turns a luminance frame into tag candidates.
///
/// A detector is bound to one frame size; owners recreate it when the size
/// changes. It is moved between threads but never shared.
pub trait TagDetector: Send {
    fn detect(&mut self, image: &GrayImageView<'_>) -> Result<Vec<RawDetection>, DetectError>;

    /// Stage timings of the most recent [`detect`](Self::detect) call.
    fn time_profile(&self) -> &TimeProfile;
}

/// Tuning for [`QuadTagDetector`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Override for the matcher's Hamming limit; defaults to the dictionary's
    /// `max_correction_bits`.
    pub max_hamming: Option<u8>,
    /// Threshold tile side in decimated pixels.
    pub tile_size: usize,
    /// Minimum local intensity range for the tile threshold to be trusted.
    pub min_contrast: u8,
    /// Smallest accepted tag side in full-resolution pixels.
    pub min_tag_side_px: f32,
    /// Minimum ratio of quad area to blob hull area.
    pub min_fill_ratio: f32,
    /// Minimum fraction of border cells that must read black.
    pub min_border_score: f32,
    /// Keep only the best-scoring detection per id.
    pub dedup_by_id: bool,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            max_hamming: None,
            tile_size: 4,
            min_contrast: 20,
            min_tag_side_px: 12.0,
            min_fill_ratio: 0.85,
            min_border_score: 0.85,
            dedup_by_id: true,
        }
    }
}

/// Pure-Rust square tag detector tied to one `(width, height, decimation)`.
///
/// Owns every scratch buffer it needs, so repeated calls on same-sized frames
/// do not allocate for the per-pixel stages.
#[derive(Debug)]
pub struct QuadTagDetector {
    matcher: Matcher,
    params: DetectorParams,
    width: usize,
    height: usize,
    decimation: u32,
    grid: SampleGrid,
    decimated: GrayImage,
    binary: Vec<u8>,
    visited: Vec<bool>,
    tiles: TileScratch,
    profile: TimeProfile,
}

impl QuadTagDetector {
    pub fn new(
        dictionary: Dictionary,
        params: DetectorParams,
        width: usize,
        height: usize,
        decimation: u32,
    ) -> Result<Self, DetectError> {
        if decimation == 0 {
            return Err(DetectError::ZeroDecimation);
        }
        let d = decimation as usize;
        if width / d < MIN_DECIMATED_SIDE || height / d < MIN_DECIMATED_SIDE {
            return Err(DetectError::ImageTooSmall {
                width,
                height,
                decimation,
            });
        }

        let max_hamming = params
            .max_hamming
            .unwrap_or(dictionary.max_correction_bits);
        let grid = SampleGrid::new(dictionary.marker_size, 1);
        let matcher = Matcher::new(dictionary, max_hamming)?;

        Ok(Self {
            matcher,
            params,
            width,
            height,
            decimation,
            grid,
            decimated: GrayImage::default(),
            binary: Vec::new(),
            visited: Vec::new(),
            tiles: TileScratch::default(),
            profile: TimeProfile::new(),
        })
    }

    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    #[inline]
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    #[inline]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    fn check_input(&self, image: &GrayImageView<'_>) -> Result<(), DetectError> {
        if image.width != self.width || image.height != self.height {
            return Err(DetectError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: image.width,
                height: image.height,
            });
        }
        let expected = self.width * self.height;
        if image.data.len() != expected {
            return Err(DetectError::InvalidBuffer {
                expected,
                got: image.data.len(),
            });
        }
        Ok(())
    }
}

impl TagDetector for QuadTagDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = image.width, height = image.height))
    )]
    fn detect(&mut self, image: &GrayImageView<'_>) -> Result<Vec<RawDetection>, DetectError> {
        self.check_input(image)?;
        self.profile.reset();

        let d = self.decimation as usize;
        decimate_into(image, d, &mut self.decimated);
        self.profile.stamp("decimate");

        adaptive_threshold(
            &self.decimated.view(),
            self.params.tile_size,
            self.params.min_contrast,
            &mut self.tiles,
            &mut self.binary,
        );
        self.profile.stamp("threshold");

        let min_side = self.params.min_tag_side_px / d as f32;
        let components = dark_components(
            &self.binary,
            self.decimated.width,
            self.decimated.height,
            (min_side.floor() as usize).max(3),
            &mut self.visited,
        );
        self.profile.stamp("segment");

        let limits = QuadLimits {
            min_side: min_side.max(2.0) as f64,
            min_fill_ratio: self.params.min_fill_ratio as f64,
        };
        let scale = d as f64;
        let matcher = &self.matcher;
        let grid = &self.grid;
        let min_border_score = self.params.min_border_score;

        let candidates: Vec<RawDetection> = components
            .par_iter()
            .filter_map(|c| {
                let quad = fit_quad(c, &limits)?;
                let corners = quad.map(|p| Point2::new((p.x * scale) as f32, (p.y * scale) as f32));
                decode_quad(image, &corners, matcher, grid, min_border_score)
            })
            .collect();

        let candidate_count = candidates.len();
        let detections = if self.params.dedup_by_id {
            dedup_by_id_keep_best(candidates)
        } else {
            candidates
        };
        self.profile.stamp("decode");

        debug!(
            "components={} decoded={} kept={}",
            components.len(),
            candidate_count,
            detections.len()
        );
        Ok(detections)
    }

    fn time_profile(&self) -> &TimeProfile {
        &self.profile
    }
}

fn decode_quad(
    image: &GrayImageView<'_>,
    corners: &[Point2<f32>; 4],
    matcher: &Matcher,
    grid: &SampleGrid,
    min_border_score: f32,
) -> Option<RawDetection> {
    let square = tag_square();
    let observed_h = homography_from_4pt(&square, corners)?;
    let obs = read_code(image, &observed_h, grid, min_border_score)?;
    let m = matcher.match_code(obs.code)?;

    let bits = matcher.dictionary().bit_count().max(1) as f32;
    let score = (obs.border_score * (1.0 - m.hamming as f32 / bits)).clamp(0.0, 1.0);

    // The observed code is the dictionary code turned clockwise `rotation`
    // times, so the tag's own corner k sits `rotation` places further on.
    let r = m.rotation as usize;
    let canonical: [Point2<f32>; 4] = std::array::from_fn(|k| corners[(k + r) % 4]);
    let homography = homography_from_4pt(&square, &canonical)?;
    let center = homography.apply(Point2::origin());

    Some(RawDetection {
        id: m.id,
        hamming: m.hamming,
        score,
        corners: canonical,
        center,
        homography,
    })
}

fn dedup_by_id_keep_best(mut dets: Vec<RawDetection>) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen = HashSet::with_capacity(dets.len());
    dets.retain(|d| seen.insert(d.id));
    dets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::tests::test_dictionary;
    use crate::synthetic::{frontal_corners, render_code, render_tag, PAPER};

    fn detector(width: usize, height: usize, decimation: u32) -> QuadTagDetector {
        QuadTagDetector::new(
            test_dictionary(),
            DetectorParams::default(),
            width,
            height,
            decimation,
        )
        .expect("detector")
    }

    fn assert_corners_close(got: &[Point2<f32>; 4], want: &[Point2<f32>; 4], tol: f32) {
        for (k, (g, w)) in got.iter().zip(want).enumerate() {
            assert!(
                (g - w).norm() <= tol,
                "corner {k}: got ({:.2},{:.2}) want ({:.2},{:.2})",
                g.x,
                g.y,
                w.x,
                w.y
            );
        }
    }

    #[test]
    fn finds_upright_and_turned_tags_in_canonical_order() {
        let dict = test_dictionary();
        for turns in 0..4u8 {
            let mut img = GrayImage::filled(200, 180, PAPER);
            let corners = frontal_corners(Point2::new(100.0, 90.0), 60.0, turns);
            render_tag(&mut img, &dict, 2, &corners, 1.0).expect("render");

            let mut det = detector(200, 180, 1);
            let found = det.detect(&img.view()).expect("detect");
            assert_eq!(found.len(), 1, "turns={turns}");
            assert_eq!(found[0].id, 2);
            assert_eq!(found[0].hamming, 0);
            assert_corners_close(&found[0].corners, &corners, 1e-3);
            assert!((found[0].center - Point2::new(100.0, 90.0)).norm() < 1e-3);
        }
    }

    #[test]
    fn decimation_keeps_full_resolution_corners() {
        let dict = test_dictionary();
        let mut img = GrayImage::filled(240, 200, PAPER);
        let corners = frontal_corners(Point2::new(120.0, 100.0), 72.0, 3);
        render_tag(&mut img, &dict, 5, &corners, 1.0).expect("render");

        let mut det = detector(240, 200, 2);
        let found = det.detect(&img.view()).expect("detect");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 5);
        assert_corners_close(&found[0].corners, &corners, 1e-3);
    }

    #[test]
    fn finds_tilted_tag() {
        let dict = test_dictionary();
        let mut img = GrayImage::filled(220, 200, PAPER);
        let corners = [
            Point2::new(62.3, 48.6),
            Point2::new(151.2, 61.9),
            Point2::new(143.7, 148.4),
            Point2::new(55.1, 131.8),
        ];
        render_tag(&mut img, &dict, 4, &corners, 1.0).expect("render");

        let mut det = detector(220, 200, 1);
        let found = det.detect(&img.view()).expect("detect");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 4);
        assert_corners_close(&found[0].corners, &corners, 1.5);
    }

    #[test]
    fn several_tags_are_reported_once_each() {
        let dict = test_dictionary();
        let mut img = GrayImage::filled(320, 160, PAPER);
        for (i, id) in [1u32, 3, 0].into_iter().enumerate() {
            let c = Point2::new(60.0 + 100.0 * i as f32, 80.0);
            render_tag(&mut img, &dict, id, &frontal_corners(c, 48.0, i as u8), 1.0)
                .expect("render");
        }

        let mut det = detector(320, 160, 1);
        let found = det.detect(&img.view()).expect("detect");
        let mut ids: Vec<u32> = found.iter().map(|d| d.id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 3]);

        let stages: Vec<String> = det
            .time_profile()
            .durations()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(stages, ["decimate", "threshold", "segment", "decode"]);
    }

    #[test]
    fn unknown_code_and_blank_frame_yield_nothing() {
        let mut img = GrayImage::filled(160, 160, PAPER);
        let mut det = detector(160, 160, 1);
        assert!(det.detect(&img.view()).expect("detect").is_empty());

        let corners = frontal_corners(Point2::new(80.0, 80.0), 60.0, 0);
        render_code(&mut img, 0x5a5a, 4, &corners, 1.0).expect("render");
        assert!(det.detect(&img.view()).expect("detect").is_empty());
    }

    #[test]
    fn rejects_mismatched_frames() {
        let mut det = detector(64, 48, 1);
        let img = GrayImage::filled(48, 64, PAPER);
        assert!(matches!(
            det.detect(&img.view()),
            Err(DetectError::DimensionMismatch { .. })
        ));

        let short = vec![0u8; 10];
        let view = GrayImageView {
            width: 64,
            height: 48,
            data: &short,
        };
        assert_eq!(
            det.detect(&view).unwrap_err(),
            DetectError::InvalidBuffer {
                expected: 64 * 48,
                got: 10
            }
        );
    }

    #[test]
    fn construction_validates_decimation() {
        let err = QuadTagDetector::new(test_dictionary(), DetectorParams::default(), 64, 64, 0)
            .unwrap_err();
        assert_eq!(err, DetectError::ZeroDecimation);

        let err = QuadTagDetector::new(test_dictionary(), DetectorParams::default(), 64, 64, 16)
            .unwrap_err();
        assert!(matches!(err, DetectError::ImageTooSmall { decimation: 16, .. }));
    }
}
