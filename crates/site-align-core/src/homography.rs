use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Projective map between two planes: `dst ~ h * src`.
///
/// In this workspace `src` is almost always the tag square `[-1, 1]²` and
/// `dst` the image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply_f64(p.x as f64, p.y as f64);
        Point2::new(q.x as f32, q.y as f32)
    }

    #[inline]
    pub fn apply_f64(&self, x: f64, y: f64) -> Point2<f64> {
        let v = self.h * Vector3::new(x, y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Similarity moving the centroid of `pts` to the origin with mean distance √2.
fn conditioning(pts: &[Point2<f32>; 4]) -> Matrix3<f64> {
    let pts = pts.map(|p| Point2::new(p.x as f64, p.y as f64));
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
    let (cx, cy) = (sx / 4.0, sy / 4.0);
    let spread = pts.iter().map(|p| (p.x - cx).hypot(p.y - cy)).sum::<f64>() / 4.0;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(
        s, 0.0, -s * cx, //
        0.0, s, -s * cy, //
        0.0, 0.0, 1.0,
    )
}

fn conditioned(t: &Matrix3<f64>, p: &Point2<f32>) -> (f64, f64) {
    let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
    (v.x, v.y)
}

/// Homography taking each `src[k]` onto `dst[k]`.
///
/// Solves the 8x8 system with `h33 = 1` on conditioned coordinates. Returns
/// `None` for degenerate (collinear or repeated) correspondences.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut rhs = SVector::<f64, 8>::zeros();
    for (k, (s, d)) in src.iter().zip(dst).enumerate() {
        let (x, y) = conditioned(&t_src, s);
        let (u, v) = conditioned(&t_dst, d);
        for (row, target, offset) in [(2 * k, u, 0), (2 * k + 1, v, 3)] {
            a[(row, offset)] = x;
            a[(row, offset + 1)] = y;
            a[(row, offset + 2)] = 1.0;
            a[(row, 6)] = -target * x;
            a[(row, 7)] = -target * y;
            rhs[row] = target;
        }
    }

    let sol = a.lu().solve(&rhs)?;
    let conditioned_h = Matrix3::new(
        sol[0], sol[1], sol[2], //
        sol[3], sol[4], sol[5], //
        sol[6], sol[7], 1.0,
    );
    let h = t_dst.try_inverse()? * conditioned_h * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    let h = h / scale;
    h.iter().all(|v| v.is_finite()).then(|| Homography::new(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SQUARE: [Point2<f32>; 4] = [
        Point2::new(-1.0, -1.0),
        Point2::new(1.0, -1.0),
        Point2::new(1.0, 1.0),
        Point2::new(-1.0, 1.0),
    ];

    fn perspective() -> Homography {
        Homography::new(Matrix3::new(
            40.0, 3.0, 320.0, //
            -2.0, 38.0, 240.0, //
            0.01, -0.02, 1.0,
        ))
    }

    #[test]
    fn inverse_maps_points_back() {
        let h = perspective();
        let inv = h.inverse().expect("invertible");
        for p in [Point2::new(0.0f32, 0.0), Point2::new(0.7, -0.3), Point2::new(-0.9, 0.9)] {
            let back = inv.apply(h.apply(p));
            assert_relative_eq!(back.x, p.x, epsilon = 1e-4);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-4);
        }
    }

    #[test]
    fn four_points_recover_a_perspective_map() {
        let truth = perspective();
        let quad = SQUARE.map(|p| truth.apply(p));
        let recovered = homography_from_4pt(&SQUARE, &quad).expect("recoverable");

        for p in [Point2::new(0.0f32, 0.0), Point2::new(0.5, -0.25), Point2::new(-0.9, 0.7)] {
            let (a, b) = (recovered.apply(p), truth.apply(p));
            assert_relative_eq!(a.x, b.x, epsilon = 1e-2);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-2);
        }
        assert_relative_eq!(recovered.h[(2, 2)], 1.0);
    }

    #[test]
    fn degenerate_targets_are_rejected() {
        assert!(homography_from_4pt(&SQUARE, &[Point2::new(5.0f32, 5.0); 4]).is_none());
        let collinear = [0.0f32, 1.0, 2.0, 3.0].map(|t| Point2::new(t, 2.0 * t));
        assert!(homography_from_4pt(&SQUARE, &collinear).is_none());
    }
}
