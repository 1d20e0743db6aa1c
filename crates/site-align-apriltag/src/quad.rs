//! Quad candidate extraction: decimation, adaptive threshold, dark connected
//! components and a four-corner fit on each component's convex hull.
//!
//! All coordinates here are in decimated pixel-edge space: pixel `i` covers
//! `[i, i + 1)`, so scaling by the decimation factor maps them back to the
//! full-resolution frame exactly.

use std::collections::VecDeque;

use nalgebra::Point2;
use rayon::prelude::*;
use site_align_core::{GrayImage, GrayImageView};

use crate::threshold::{histogram, otsu_threshold};

/// Box-filter `src` down by `factor`, dropping incomplete border blocks.
pub(crate) fn decimate_into(src: &GrayImageView<'_>, factor: usize, out: &mut GrayImage) {
    let ow = src.width / factor;
    let oh = src.height / factor;
    out.width = ow;
    out.height = oh;
    out.data.resize(ow * oh, 0);

    if factor == 1 {
        out.data.copy_from_slice(&src.data[..ow * oh]);
        return;
    }

    let area = (factor * factor) as u32;
    out.data
        .par_chunks_mut(ow)
        .enumerate()
        .for_each(|(oy, row)| {
            for (ox, dst) in row.iter_mut().enumerate() {
                let mut sum = 0u32;
                for dy in 0..factor {
                    let start = (oy * factor + dy) * src.width + ox * factor;
                    sum += src.data[start..start + factor]
                        .iter()
                        .map(|&v| v as u32)
                        .sum::<u32>();
                }
                *dst = ((sum + area / 2) / area) as u8;
            }
        });
}

/// Reusable per-tile extrema buffers.
#[derive(Debug, Default)]
pub(crate) struct TileScratch {
    tile_min: Vec<u8>,
    tile_max: Vec<u8>,
    nb_min: Vec<u8>,
    nb_max: Vec<u8>,
}

/// Binarize `src` into `out` (`1` = dark).
///
/// Each pixel is compared against the midpoint of the intensity range over the
/// 3x3 tiles around its own tile. Where that range is below `min_contrast` the
/// global Otsu threshold of the frame is used instead, so flat regions follow
/// the frame-wide split rather than amplifying noise.
pub(crate) fn adaptive_threshold(
    src: &GrayImageView<'_>,
    tile: usize,
    min_contrast: u8,
    scratch: &mut TileScratch,
    out: &mut Vec<u8>,
) {
    let (w, h) = (src.width, src.height);
    let tile = tile.max(1);
    let tx = w.div_ceil(tile);
    let ty = h.div_ceil(tile);

    scratch.tile_min.resize(tx * ty, 0);
    scratch.tile_max.resize(tx * ty, 0);
    scratch
        .tile_min
        .par_chunks_mut(tx)
        .zip(scratch.tile_max.par_chunks_mut(tx))
        .enumerate()
        .for_each(|(j, (mins, maxs))| {
            let y0 = j * tile;
            let y1 = (y0 + tile).min(h);
            for i in 0..tx {
                let x0 = i * tile;
                let x1 = (x0 + tile).min(w);
                let mut lo = 255u8;
                let mut hi = 0u8;
                for y in y0..y1 {
                    for &v in &src.data[y * w + x0..y * w + x1] {
                        lo = lo.min(v);
                        hi = hi.max(v);
                    }
                }
                mins[i] = lo;
                maxs[i] = hi;
            }
        });

    scratch.nb_min.resize(tx * ty, 0);
    scratch.nb_max.resize(tx * ty, 0);
    for j in 0..ty {
        for i in 0..tx {
            let mut lo = 255u8;
            let mut hi = 0u8;
            for nj in j.saturating_sub(1)..(j + 2).min(ty) {
                for ni in i.saturating_sub(1)..(i + 2).min(tx) {
                    lo = lo.min(scratch.tile_min[nj * tx + ni]);
                    hi = hi.max(scratch.tile_max[nj * tx + ni]);
                }
            }
            scratch.nb_min[j * tx + i] = lo;
            scratch.nb_max[j * tx + i] = hi;
        }
    }

    let global = otsu_threshold(&histogram(src.data));
    let nb_min = &scratch.nb_min;
    let nb_max = &scratch.nb_max;

    out.resize(w * h, 0);
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let j = y / tile;
        let pixels = &src.data[y * w..(y + 1) * w];
        for (x, (dst, &v)) in row.iter_mut().zip(pixels).enumerate() {
            let t = j * tx + x / tile;
            let (lo, hi) = (nb_min[t], nb_max[t]);
            let thr = if hi - lo < min_contrast {
                global as u16
            } else {
                (lo as u16 + hi as u16 + 1) / 2
            };
            *dst = u8::from((v as u16) < thr);
        }
    });
}

/// A 4-connected blob of dark pixels.
#[derive(Clone, Debug)]
pub(crate) struct Component {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
    pub area: usize,
    /// Leftmost and rightmost pixel per row, starting at `min_y`.
    pub rows: Vec<(usize, usize)>,
}

impl Component {
    #[inline]
    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }
}

/// Collect dark components whose bounding box is at least `min_side` on both
/// axes and does not touch the frame edge (such tags cannot be decoded).
pub(crate) fn dark_components(
    binary: &[u8],
    width: usize,
    height: usize,
    min_side: usize,
    visited: &mut Vec<bool>,
) -> Vec<Component> {
    visited.clear();
    visited.resize(width * height, false);

    let mut out = Vec::new();
    let mut queue = VecDeque::new();
    let mut pixels: Vec<(usize, usize)> = Vec::new();

    for y0 in 0..height {
        for x0 in 0..width {
            let idx0 = y0 * width + x0;
            if visited[idx0] || binary[idx0] == 0 {
                continue;
            }
            visited[idx0] = true;
            queue.push_back((x0, y0));
            pixels.clear();

            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
            while let Some((x, y)) = queue.pop_front() {
                pixels.push((x, y));
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let neighbours = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbours {
                    if nx >= width || ny >= height {
                        continue;
                    }
                    let nidx = ny * width + nx;
                    if visited[nidx] || binary[nidx] == 0 {
                        continue;
                    }
                    visited[nidx] = true;
                    queue.push_back((nx, ny));
                }
            }

            let touches_edge = min_x == 0 || min_y == 0 || max_x + 1 == width || max_y + 1 == height;
            if touches_edge || max_x - min_x + 1 < min_side || max_y - min_y + 1 < min_side {
                continue;
            }

            let mut rows = vec![(usize::MAX, 0usize); max_y - min_y + 1];
            for &(x, y) in &pixels {
                let r = &mut rows[y - min_y];
                r.0 = r.0.min(x);
                r.1 = r.1.max(x);
            }

            out.push(Component {
                min_x,
                min_y,
                max_x,
                max_y,
                area: pixels.len(),
                rows,
            });
        }
    }

    out
}

#[inline]
fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull of the component's pixel squares (monotone chain, collinear
/// points dropped). The hull winds positively in image coordinates.
pub(crate) fn component_hull(c: &Component) -> Vec<Point2<f64>> {
    let mut pts = Vec::with_capacity(c.rows.len() * 4);
    for (i, &(left, right)) in c.rows.iter().enumerate() {
        let y = (c.min_y + i) as f64;
        let l = left as f64;
        let r = (right + 1) as f64;
        pts.extend([
            Point2::new(l, y),
            Point2::new(l, y + 1.0),
            Point2::new(r, y),
            Point2::new(r, y + 1.0),
        ]);
    }
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(pts.len() + 1);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Signed polygon area; positive for TL, TR, BR, BL order in image coordinates.
pub(crate) fn signed_area(poly: &[Point2<f64>]) -> f64 {
    let n = poly.len();
    let mut acc = 0.0;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

fn polygon_centroid(poly: &[Point2<f64>], area: f64) -> Point2<f64> {
    let n = poly.len();
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let f = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * f;
        cy += (a.y + b.y) * f;
    }
    Point2::new(cx / (6.0 * area), cy / (6.0 * area))
}

/// Geometric acceptance limits for a fitted quad.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QuadLimits {
    pub min_side: f64,
    pub min_fill_ratio: f64,
}

/// Fit four corners to a component hull and return them with positive winding.
///
/// The first corner is the hull vertex farthest from the hull centroid, the
/// third the vertex farthest from the first, and the remaining two are the
/// extreme vertices on either side of that diagonal.
pub(crate) fn fit_quad(c: &Component, limits: &QuadLimits) -> Option<[Point2<f64>; 4]> {
    let hull = component_hull(c);
    if hull.len() < 4 {
        return None;
    }
    let hull_area = signed_area(&hull);
    if hull_area <= 0.0 {
        return None;
    }
    let centroid = polygon_centroid(&hull, hull_area);

    let farthest = |from: Point2<f64>| {
        hull.iter()
            .copied()
            .max_by(|a, b| (a - from).norm_squared().total_cmp(&(b - from).norm_squared()))
    };
    let c0 = farthest(centroid)?;
    let c2 = farthest(c0)?;

    let mut pos = (0.0, c0);
    let mut neg = (0.0, c0);
    for &p in &hull {
        let d = cross(c0, c2, p);
        if d > pos.0 {
            pos = (d, p);
        }
        if d < neg.0 {
            neg = (d, p);
        }
    }
    if pos.0 <= 0.0 || neg.0 >= 0.0 {
        return None;
    }

    let mut quad = [c0, neg.1, c2, pos.1];
    if signed_area(&quad) < 0.0 {
        quad.swap(1, 3);
    }

    if !is_convex(&quad) {
        return None;
    }
    for i in 0..4 {
        if (quad[(i + 1) % 4] - quad[i]).norm() < limits.min_side {
            return None;
        }
    }
    if signed_area(&quad) / hull_area < limits.min_fill_ratio {
        return None;
    }

    Some(quad)
}

fn is_convex(quad: &[Point2<f64>; 4]) -> bool {
    (0..4).all(|i| cross(quad[i], quad[(i + 1) % 4], quad[(i + 2) % 4]) > 0.0)
}
