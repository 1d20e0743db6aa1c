//! Rendering of tags into grey images.
//!
//! Used for detector tests, pipeline demos and printable previews. Each pixel
//! is classified by where its centre lands in tag-square coordinates, so an
//! axis-aligned tag with integer corners renders with exact edges.

use nalgebra::Point2;
use site_align_core::{homography_from_4pt, GrayImage};

use crate::decode::tag_square;
use crate::{DetectError, Dictionary};

/// Intensity used for black cells.
pub const INK: u8 = 16;
/// Intensity used for white cells and the quiet zone.
pub const PAPER: u8 = 240;

/// Corners (TL, TR, BR, BL of the tag itself) of an upright square tag centred
/// at `center`, turned clockwise in the image by `quarter_turns`.
pub fn frontal_corners(center: Point2<f32>, side: f32, quarter_turns: u8) -> [Point2<f32>; 4] {
    let h = 0.5 * side;
    let visual = [
        Point2::new(center.x - h, center.y - h),
        Point2::new(center.x + h, center.y - h),
        Point2::new(center.x + h, center.y + h),
        Point2::new(center.x - h, center.y + h),
    ];
    let r = (quarter_turns & 3) as usize;
    std::array::from_fn(|k| visual[(k + r) % 4])
}

/// Render tag `id` of `dict` so that its outer border corners land on `corners`.
///
/// `quiet_zone` is the width of the white margin around the tag, in cells.
pub fn render_tag(
    img: &mut GrayImage,
    dict: &Dictionary,
    id: u32,
    corners: &[Point2<f32>; 4],
    quiet_zone: f32,
) -> Result<(), DetectError> {
    let code = dict.code(id).ok_or(DetectError::UnknownId(id))?;
    render_code(img, code, dict.marker_size, corners, quiet_zone)
}

/// Render an arbitrary payload with a one-cell black border.
pub fn render_code(
    img: &mut GrayImage,
    code: u64,
    marker_size: usize,
    corners: &[Point2<f32>; 4],
    quiet_zone: f32,
) -> Result<(), DetectError> {
    let h = homography_from_4pt(&tag_square(), corners).ok_or(DetectError::DegenerateQuad)?;
    let inv = h.inverse().ok_or(DetectError::DegenerateQuad)?;

    let cells = marker_size + 2;
    let extent = 1.0 + 2.0 * quiet_zone.max(0.0) / cells as f32;

    let outer = [
        Point2::new(-extent, -extent),
        Point2::new(extent, -extent),
        Point2::new(extent, extent),
        Point2::new(-extent, extent),
    ]
    .map(|p| h.apply(p));
    let min_x = outer.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
    let min_y = outer.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
    let max_x = (outer.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as usize)
        .min(img.width);
    let max_y = (outer.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as usize)
        .min(img.height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let t = inv.apply_f64(x as f64 + 0.5, y as f64 + 0.5);
            let (u, v) = (t.x as f32, t.y as f32);
            if u.abs() > extent || v.abs() > extent {
                continue;
            }
            let value = if u.abs() < 1.0 && v.abs() < 1.0 {
                let cx = (((u + 1.0) * 0.5 * cells as f32) as usize).min(cells - 1);
                let cy = (((v + 1.0) * 0.5 * cells as f32) as usize).min(cells - 1);
                let border = cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells;
                let black = border || (code >> ((cy - 1) * marker_size + (cx - 1))) & 1 == 1;
                if black {
                    INK
                } else {
                    PAPER
                }
            } else {
                PAPER
            };
            img.data[y * img.width + x] = value;
        }
    }

    Ok(())
}
