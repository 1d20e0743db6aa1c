//! Rotation helpers and the rigid model-root transform.
//!
//! All frames are right-handed with +Y up. "Yaw" is the rotation about +Y and
//! Euler triples follow the Z-X-Y order (roll applied first, yaw last), so a
//! rotation decomposes as `R = Ry(yaw) * Rx(pitch) * Rz(roll)`.

use std::f64::consts::{PI, TAU};

use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Wrap an angle in radians into `(-π, π]`.
pub fn wrap_angle(a: f64) -> f64 {
    let mut r = a.rem_euclid(TAU);
    if r > PI {
        r -= TAU;
    }
    r
}

/// Yaw (rotation about +Y) of `q`, in radians, wrapped to `(-π, π]`.
pub fn yaw_of(q: &UnitQuaternion<f64>) -> f64 {
    let r = q.to_rotation_matrix();
    let m = r.matrix();
    // cos(pitch) vanishes when looking straight up or down.
    let cos_pitch = m[(0, 2)].hypot(m[(2, 2)]);
    let yaw = if cos_pitch > 1e-9 {
        m[(0, 2)].atan2(m[(2, 2)])
    } else {
        (-m[(2, 0)]).atan2(m[(0, 0)])
    };
    wrap_angle(yaw)
}

/// Pure rotation about +Y by `yaw` radians.
#[inline]
pub fn yaw_rotation(yaw: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw)
}

/// Rotation built from Z-X-Y Euler angles in degrees (`x` pitch, `y` yaw, `z` roll).
pub fn euler_zxy_degrees(x: f64, y: f64, z: f64) -> UnitQuaternion<f64> {
    let rx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x.to_radians());
    let ry = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y.to_radians());
    let rz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z.to_radians());
    ry * rx * rz
}

/// Shortest-arc rotation taking the direction of `from` onto the direction of `to`.
///
/// Antiparallel inputs yield a half turn about an axis perpendicular to
/// `from`. A zero-length input yields the identity.
pub fn from_to_rotation(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    if from.norm_squared() < 1e-24 || to.norm_squared() < 1e-24 {
        return UnitQuaternion::identity();
    }
    if let Some(q) = UnitQuaternion::rotation_between(from, to) {
        return q;
    }
    let helper = if from.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let axis = Unit::new_normalize(from.cross(&helper));
    UnitQuaternion::from_axis_angle(&axis, PI)
}

/// Rigid placement of the model root in session space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelTransform {
    pub translation: Vector3<f64>,
    #[serde(deserialize_with = "crate::pose::deserialize_rotation")]
    pub rotation: UnitQuaternion<f64>,
}

impl Default for ModelTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ModelTransform {
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Orbit the transform about the vertical axis through `center` by `yaw` radians.
    ///
    /// Both the translation and the orientation are rotated.
    pub fn rotate_around(&mut self, center: &Vector3<f64>, yaw: f64) {
        let q = yaw_rotation(yaw);
        self.translation = center + q * (self.translation - center);
        self.rotation = q * self.rotation;
    }

    /// Model-space point to session space.
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// Session-space point to model space.
    pub fn inverse_transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.inverse() * (p.coords - self.translation))
    }
}
