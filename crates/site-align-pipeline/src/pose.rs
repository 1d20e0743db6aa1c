//! Tag pose from four image corners.
//!
//! The solver runs in the OpenCV camera frame (x right, y down, z forward):
//! a linear initialisation from the tag homography is refined by orthogonal
//! iteration (Lu, Hager & Mjolsness) over the four corners. Published poses
//! are converted to the y-up camera frame used by the rest of the workspace.

use nalgebra::{Matrix3, Point2, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use site_align_apriltag::{tag_square, RawDetection};
use site_align_core::TagPose;

use crate::PoseError;

const MAX_ITERATIONS: usize = 50;
const CONVERGENCE_EPS: f64 = 1e-12;

/// Pinhole intrinsics derived from the vertical field of view.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Square pixels, principal point at the image centre.
    ///
    /// `fov` is the vertical field of view in radians and must lie in `(0, π)`.
    pub fn from_vertical_fov(width: usize, height: usize, fov: f64) -> Result<Self, PoseError> {
        if width == 0 || height == 0 {
            return Err(PoseError::InvalidDimensions { width, height });
        }
        if !(fov.is_finite() && fov > 0.0 && fov < std::f64::consts::PI) {
            return Err(PoseError::InvalidFov(fov));
        }
        let fy = 0.5 * height as f64 / (0.5 * fov).tan();
        Ok(Self {
            fx: fy,
            fy,
            cx: 0.5 * width as f64,
            cy: 0.5 * height as f64,
        })
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Normalized viewing ray through pixel-edge coordinate `p`.
    #[inline]
    pub fn ray(&self, p: Point2<f64>) -> Vector3<f64> {
        Vector3::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy, 1.0)
    }

    /// Project an OpenCV camera-frame point to pixels.
    #[inline]
    pub fn project(&self, p: &Vector3<f64>) -> Point2<f64> {
        Point2::new(self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy)
    }
}

/// A solved tag pose and its object-space residual.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseEstimate {
    /// Pose in the y-up camera frame.
    pub pose: TagPose,
    /// Sum of squared object-space distances to the viewing rays.
    pub error: f64,
}

/// Estimate the pose of one detected tag with physical side `tag_size`.
pub fn estimate_tag_pose(
    det: &RawDetection,
    intrinsics: &CameraIntrinsics,
    tag_size: f64,
) -> Result<PoseEstimate, PoseError> {
    if !(tag_size.is_finite() && tag_size > 0.0) {
        return Err(PoseError::InvalidTagSize(tag_size));
    }
    let half = 0.5 * tag_size;

    let object = tag_square().map(|p| Vector3::new(p.x as f64 * half, p.y as f64 * half, 0.0));
    let rays = det
        .corners
        .map(|c| intrinsics.ray(Point2::new(c.x as f64, c.y as f64)));

    let r0 = rotation_from_homography(&det.homography.h, intrinsics)
        .ok_or(PoseError::Degenerate { id: det.id })?;
    let (r, t, error) =
        orthogonal_iteration(&rays, &object, r0).ok_or(PoseError::Degenerate { id: det.id })?;
    if t.z <= 0.0 || !error.is_finite() {
        return Err(PoseError::Degenerate { id: det.id });
    }

    // Flip y: S = diag(1, -1, 1), position = S t, rotation = S R S.
    let s = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, 1.0));
    let position = Vector3::new(t.x, -t.y, t.z);
    let rotation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(s * r * s));

    Ok(PoseEstimate {
        pose: TagPose::new(det.id, position, rotation),
        error,
    })
}

/// Linear rotation estimate from `H ~ K [r1 r2 t]`, projected onto SO(3).
fn rotation_from_homography(h: &Matrix3<f64>, k: &CameraIntrinsics) -> Option<Matrix3<f64>> {
    let m = k.matrix().try_inverse()? * h;
    let mut r1 = m.column(0).into_owned();
    let mut r2 = m.column(1).into_owned();
    let t = m.column(2).into_owned();

    let scale = 0.5 * (r1.norm() + r2.norm());
    if scale <= 1e-12 {
        return None;
    }
    r1 /= scale;
    r2 /= scale;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
    }
    let r3 = r1.cross(&r2);
    project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]))
}

fn project_to_so3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r = u * v_t;
    r.iter().all(|v| v.is_finite()).then_some(r)
}

/// Refine `r` by orthogonal iteration; returns rotation, translation and
/// object-space error, all in the OpenCV camera frame.
fn orthogonal_iteration(
    rays: &[Vector3<f64>; 4],
    object: &[Vector3<f64>; 4],
    mut r: Matrix3<f64>,
) -> Option<(Matrix3<f64>, Vector3<f64>, f64)> {
    let n = rays.len() as f64;
    let proj: [Matrix3<f64>; 4] = rays.map(|v| (v * v.transpose()) / v.norm_squared());

    let p_mean = object.iter().sum::<Vector3<f64>>() / n;
    let p_res = object.map(|p| p - p_mean);

    let f_mean = proj.iter().sum::<Matrix3<f64>>() / n;
    let m1_inv = (Matrix3::identity() - f_mean).try_inverse()?;

    let translation = |r: &Matrix3<f64>| {
        let acc = proj
            .iter()
            .zip(object)
            .map(|(f, p)| (f - Matrix3::identity()) * (r * p))
            .sum::<Vector3<f64>>();
        m1_inv * (acc / n)
    };
    let object_error = |r: &Matrix3<f64>, t: &Vector3<f64>| {
        proj.iter()
            .zip(object)
            .map(|(f, p)| {
                let x = r * p + t;
                (x - f * x).norm_squared()
            })
            .sum::<f64>()
    };

    let mut t = translation(&r);
    let mut err = object_error(&r, &t);

    for _ in 0..MAX_ITERATIONS {
        let q = std::array::from_fn::<Vector3<f64>, 4, _>(|i| proj[i] * (r * object[i] + t));
        let q_mean = q.iter().sum::<Vector3<f64>>() / n;
        let m3 = q
            .iter()
            .zip(&p_res)
            .map(|(qi, pi)| (qi - q_mean) * pi.transpose())
            .sum::<Matrix3<f64>>();

        r = project_to_so3(&m3)?;
        t = translation(&r);
        let next = object_error(&r, &t);
        let done = (err - next).abs() < CONVERGENCE_EPS;
        err = next;
        if done {
            break;
        }
    }

    Some((r, t, err))
}
