//! Payload sampling inside a quad.
//!
//! Sampling happens in tag-square coordinates `[-1, 1]²` (TL = `(-1, -1)`),
//! mapped into the frame through the quad homography. The outer ring of cells
//! is the black border, the inner `marker_size²` cells carry the code.

use nalgebra::Point2;
use site_align_core::{GrayImageView, Homography};

use crate::threshold::otsu_threshold_from_samples;

/// Tag-square corners in canonical order TL, TR, BR, BL.
pub fn tag_square() -> [Point2<f32>; 4] {
    [
        Point2::new(-1.0, -1.0),
        Point2::new(1.0, -1.0),
        Point2::new(1.0, 1.0),
        Point2::new(-1.0, 1.0),
    ]
}

const THRESH_SUBDIV: usize = 3;

/// Precomputed sampling positions for one tag layout.
#[derive(Clone, Debug)]
pub(crate) struct SampleGrid {
    bits: usize,
    border: usize,
    cells: usize,
    /// Cell centres, row-major over `cells × cells`.
    points: Vec<Point2<f32>>,
    /// Denser grid over the whole tag used for the binarization threshold.
    threshold_points: Vec<Point2<f32>>,
}

/// Centres of an `n × n` subdivision of the tag square, row-major.
fn centres(n: usize) -> Vec<Point2<f32>> {
    let step = 2.0 / n as f32;
    let at = |i: usize| -1.0 + (i as f32 + 0.5) * step;
    (0..n * n).map(|k| Point2::new(at(k % n), at(k / n))).collect()
}

impl SampleGrid {
    pub fn new(bits: usize, border: usize) -> Self {
        let cells = bits + 2 * border;
        Self {
            bits,
            border,
            cells,
            points: centres(cells),
            threshold_points: centres(cells * THRESH_SUBDIV),
        }
    }

    fn in_border(&self, cx: usize, cy: usize) -> bool {
        let far = self.cells - self.border;
        cx < self.border || cy < self.border || cx >= far || cy >= far
    }
}

/// Code read from a quad in the quad's own corner order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Observation {
    /// Payload bits, row-major, black = 1.
    pub code: u64,
    /// Fraction of border cells that read black.
    pub border_score: f32,
}

/// Sample the grid through `h` and binarize it.
///
/// Returns `None` when a cell centre falls too close to the frame edge or the
/// border ring is not dark enough.
pub(crate) fn read_code(
    img: &GrayImageView<'_>,
    h: &Homography,
    grid: &SampleGrid,
    min_border_score: f32,
) -> Option<Observation> {
    let sample = |p: &Point2<f32>| {
        let q = h.apply(*p);
        sample_mean_3x3(img, q.x, q.y)
    };
    let samples = grid.points.iter().map(sample).collect::<Option<Vec<u8>>>()?;
    let thr_samples: Vec<u8> = grid.threshold_points.iter().filter_map(sample).collect();
    let thr = otsu_threshold_from_samples(&thr_samples);

    let mut border_dark = 0u32;
    let mut border_total = 0u32;
    let mut code = 0u64;
    for (k, &value) in samples.iter().enumerate() {
        let (cx, cy) = (k % grid.cells, k / grid.cells);
        let black = value < thr;
        if grid.in_border(cx, cy) {
            border_total += 1;
            border_dark += u32::from(black);
        } else if black {
            code |= 1u64 << ((cy - grid.border) * grid.bits + cx - grid.border);
        }
    }

    let border_score = match border_total {
        0 => 1.0,
        n => border_dark as f32 / n as f32,
    };
    if border_score < min_border_score {
        return None;
    }

    Some(Observation { code, border_score })
}

fn sample_mean_3x3(img: &GrayImageView<'_>, x: f32, y: f32) -> Option<u8> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let ix = x.floor() as i64;
    let iy = y.floor() as i64;
    if ix < 1 || iy < 1 || ix + 1 >= img.width as i64 || iy + 1 >= img.height as i64 {
        return None;
    }
    let (ix, iy) = (ix as usize, iy as usize);

    let mut sum = 0u32;
    for yy in iy - 1..=iy + 1 {
        let row = &img.data[yy * img.width..];
        sum += row[ix - 1..=ix + 1].iter().map(|&v| v as u32).sum::<u32>();
    }
    Some((sum / 9) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_align_core::{homography_from_4pt, GrayImage};

    fn paint_marker(code: u64, bits: usize, cell_px: usize, margin: usize) -> GrayImage {
        let cells = bits + 2;
        let side = cells * cell_px + 2 * margin;
        let mut img = GrayImage::filled(side, side, 255);
        for cy in 0..cells {
            for cx in 0..cells {
                let border = cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells;
                let black = border || (code >> ((cy - 1) * bits + (cx - 1))) & 1 == 1;
                if !black {
                    continue;
                }
                for y in 0..cell_px {
                    for x in 0..cell_px {
                        let px = margin + cx * cell_px + x;
                        let py = margin + cy * cell_px + y;
                        img.data[py * side + px] = 0;
                    }
                }
            }
        }
        img
    }

    fn quad_for(margin: usize, side: usize) -> [Point2<f32>; 4] {
        let a = margin as f32;
        let b = (margin + side) as f32;
        [
            Point2::new(a, a),
            Point2::new(b, a),
            Point2::new(b, b),
            Point2::new(a, b),
        ]
    }

    #[test]
    fn reads_axis_aligned_code() {
        let code = 0x9c92;
        let img = paint_marker(code, 4, 10, 12);
        let h = homography_from_4pt(&tag_square(), &quad_for(12, 60)).expect("h");
        let grid = SampleGrid::new(4, 1);

        let obs = read_code(&img.view(), &h, &grid, 0.85).expect("observation");
        assert_eq!(obs.code, code);
        assert_eq!(obs.border_score, 1.0);
    }

    #[test]
    fn missing_border_is_rejected() {
        let img = GrayImage::filled(84, 84, 255);
        let h = homography_from_4pt(&tag_square(), &quad_for(12, 60)).expect("h");
        let grid = SampleGrid::new(4, 1);
        assert!(read_code(&img.view(), &h, &grid, 0.85).is_none());
    }

    #[test]
    fn quad_leaving_the_frame_is_rejected() {
        let img = paint_marker(0x9c92, 4, 10, 12);
        let h = homography_from_4pt(&tag_square(), &quad_for(50, 60)).expect("h");
        let grid = SampleGrid::new(4, 1);
        assert!(read_code(&img.view(), &h, &grid, 0.85).is_none());
    }
}
