use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Quaternions shorter than this are rejected rather than normalised.
const MIN_QUATERNION_NORM: f64 = 1e-9;

/// Read a `[i, j, k, w]` quaternion and normalise it.
///
/// nalgebra's own `Unit` impl trusts its input, so poses and transforms
/// loaded from JSON go through this instead.
pub(crate) fn deserialize_rotation<'de, D>(deserializer: D) -> Result<UnitQuaternion<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Quaternion::<f64>::deserialize(deserializer)?;
    if !raw.coords.iter().all(|c| c.is_finite()) {
        return Err(de::Error::custom("rotation quaternion is not finite"));
    }
    UnitQuaternion::try_new(raw, MIN_QUATERNION_NORM).ok_or_else(|| {
        de::Error::custom(format!(
            "rotation quaternion has near-zero norm {}",
            raw.norm()
        ))
    })
}

/// Position and orientation of one tag.
///
/// Depending on the producer this is expressed in camera space (pose
/// estimator), session space (after [`CameraPose::to_session`]) or model
/// space (surveyed markers). The rotation is a unit quaternion, so it is
/// always a valid orientation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagPose {
    pub id: u32,
    pub position: Vector3<f64>,
    #[serde(deserialize_with = "deserialize_rotation")]
    pub rotation: UnitQuaternion<f64>,
}

impl TagPose {
    pub fn new(id: u32, position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            id,
            position,
            rotation,
        }
    }

    /// Distance from the frame origin, i.e. from the camera for camera-space poses.
    #[inline]
    pub fn distance(&self) -> f64 {
        self.position.norm()
    }
}

/// Camera pose in session space, as reported by the AR tracker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vector3<f64>,
    #[serde(deserialize_with = "deserialize_rotation")]
    pub rotation: UnitQuaternion<f64>,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

impl CameraPose {
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Express a camera-space tag pose in session space.
    pub fn to_session(&self, tag: &TagPose) -> TagPose {
        TagPose {
            id: tag.id,
            position: self.rotation * tag.position + self.position,
            rotation: self.rotation * tag.rotation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn identity_camera_keeps_pose() {
        let tag = TagPose::new(7, Vector3::new(0.1, -0.2, 1.5), UnitQuaternion::identity());
        let out = CameraPose::default().to_session(&tag);
        assert_eq!(out, tag);
    }

    #[test]
    fn camera_rotation_and_offset_are_applied() {
        let camera = CameraPose::new(
            Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2),
        );
        let tag = TagPose::new(3, Vector3::new(0.0, 0.0, 1.0), UnitQuaternion::identity());
        let out = camera.to_session(&tag);

        // +90 deg about Y turns forward (+z) into +x.
        assert_relative_eq!(out.position, Vector3::new(2.0, 2.0, 3.0), epsilon = 1e-12);
        assert_relative_eq!(out.rotation.angle(), FRAC_PI_2, epsilon = 1e-12);
        assert_eq!(out.id, 3);
    }

    #[test]
    fn tag_pose_serializes_with_named_fields() {
        let tag = TagPose::new(4, Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
        let json = serde_json::to_value(tag).expect("serialize");
        assert_eq!(json["id"], 4);
        assert!(json["position"].is_array());
        let back: TagPose = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, tag);
    }

    #[test]
    fn loaded_rotations_are_normalised() {
        let json = r#"{"id":1,"position":[0,0,1],"rotation":[0,0,0,3]}"#;
        let tag: TagPose = serde_json::from_str(json).expect("deserialize");
        assert_relative_eq!(tag.rotation.quaternion().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(tag.rotation.angle(), 0.0, epsilon = 1e-12);

        let camera: CameraPose =
            serde_json::from_str(r#"{"position":[0,0,0],"rotation":[0,2,0,2]}"#).expect("camera");
        assert_relative_eq!(camera.rotation.quaternion().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(camera.rotation.angle(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn zero_rotation_is_rejected() {
        let json = r#"{"id":1,"position":[0,0,1],"rotation":[0,0,0,0]}"#;
        let err = serde_json::from_str::<TagPose>(json).unwrap_err();
        assert!(err.to_string().contains("near-zero norm"), "{err}");
    }
}
