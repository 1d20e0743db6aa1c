//! The surveyed marker set a session aligns against.

use std::collections::BTreeMap;
use std::ops::Bound;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use site_align_core::{euler_zxy_degrees, yaw_of, TagPose};

/// Errors raised while building a [`ModeledMarkers`] set.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerSetError {
    #[error("marker id {0:?} is not a non-negative integer")]
    InvalidId(String),
    #[error("marker id {0} appears more than once")]
    DuplicateId(u32),
    #[error("marker {0} has a non-finite position or orientation")]
    NonFinite(u32),
}

/// One marker as stored by the site server.
///
/// `orientation` holds Z-X-Y Euler angles in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub id: String,
    pub position: [f64; 3],
    pub orientation: [f64; 3],
}

/// Top-level marker document: `{"markers": [...]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerFile {
    pub markers: Vec<MarkerRecord>,
}

/// Read-only map from tag id to its surveyed model-space pose, with the
/// pairwise separations used to pick two-tag partners.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModeledMarkers {
    poses: BTreeMap<u32, TagPose>,
    distances: BTreeMap<(u32, u32), f64>,
}

impl ModeledMarkers {
    pub fn new(poses: impl IntoIterator<Item = TagPose>) -> Result<Self, MarkerSetError> {
        let mut map = BTreeMap::new();
        for pose in poses {
            if !pose.position.iter().all(|v| v.is_finite())
                || !pose.rotation.coords.iter().all(|v| v.is_finite())
            {
                return Err(MarkerSetError::NonFinite(pose.id));
            }
            if map.insert(pose.id, pose).is_some() {
                return Err(MarkerSetError::DuplicateId(pose.id));
            }
        }

        let mut distances = BTreeMap::new();
        for (i, a) in &map {
            for (j, b) in map.range((Bound::Excluded(*i), Bound::Unbounded)) {
                distances.insert((*i, *j), (a.position - b.position).norm());
            }
        }

        Ok(Self {
            poses: map,
            distances,
        })
    }

    pub fn from_records(records: &[MarkerRecord]) -> Result<Self, MarkerSetError> {
        let poses = records
            .iter()
            .map(|r| {
                let id = r
                    .id
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| MarkerSetError::InvalidId(r.id.clone()))?;
                let [x, y, z] = r.position;
                let [ex, ey, ez] = r.orientation;
                Ok(TagPose::new(
                    id,
                    Vector3::new(x, y, z),
                    euler_zxy_degrees(ex, ey, ez),
                ))
            })
            .collect::<Result<Vec<_>, MarkerSetError>>()?;
        Self::new(poses)
    }

    /// Records in the server schema, ordered by id. Orientation keeps yaw
    /// exactly and recovers pitch and roll from the Z-X-Y decomposition.
    pub fn to_records(&self) -> Vec<MarkerRecord> {
        self.poses
            .values()
            .map(|p| {
                let m = p.rotation.to_rotation_matrix().into_inner();
                let pitch = (-m[(1, 2)]).clamp(-1.0, 1.0).asin();
                let roll = m[(1, 0)].atan2(m[(1, 1)]);
                MarkerRecord {
                    id: p.id.to_string(),
                    position: [p.position.x, p.position.y, p.position.z],
                    orientation: [
                        pitch.to_degrees(),
                        yaw_of(&p.rotation).to_degrees(),
                        roll.to_degrees(),
                    ],
                }
            })
            .collect()
    }

    pub fn get(&self, id: u32) -> Option<&TagPose> {
        self.poses.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.poses.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.poses.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagPose> {
        self.poses.values()
    }

    /// Modeled separation of two distinct markers. Symmetric.
    pub fn distance(&self, a: u32, b: u32) -> Option<f64> {
        let key = if a < b { (a, b) } else { (b, a) };
        self.distances.get(&key).copied()
    }

    /// Markers at least `min_distance` away from `id`, in id order.
    pub fn partners(&self, id: u32, min_distance: f64) -> impl Iterator<Item = u32> + '_ {
        self.ids()
            .filter(move |&other| other != id)
            .filter(move |&other| self.distance(id, other).is_some_and(|d| d >= min_distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn record(id: &str, position: [f64; 3], orientation: [f64; 3]) -> MarkerRecord {
        MarkerRecord {
            id: id.to_string(),
            position,
            orientation,
        }
    }

    #[test]
    fn distances_are_symmetric() {
        let set = ModeledMarkers::new([
            TagPose::new(1, Vector3::zeros(), UnitQuaternion::identity()),
            TagPose::new(4, Vector3::new(3.0, 4.0, 0.0), UnitQuaternion::identity()),
            TagPose::new(2, Vector3::new(0.3, 0.0, 0.0), UnitQuaternion::identity()),
        ])
        .unwrap();

        assert_eq!(set.distance(1, 4), Some(5.0));
        assert_eq!(set.distance(4, 1), Some(5.0));
        assert_eq!(set.distance(1, 1), None);
        assert_eq!(set.distance(1, 9), None);
        assert_eq!(set.ids().collect::<Vec<_>>(), [1, 2, 4]);
        assert_eq!(set.partners(1, 0.5).collect::<Vec<_>>(), [4]);
        assert_eq!(set.partners(2, 0.3).collect::<Vec<_>>(), [1, 4]);
    }

    #[test]
    fn server_records_are_parsed() {
        let json = r#"{"markers": [
            {"id": "7", "position": [1.0, 0.0, 2.0], "orientation": [0.0, 90.0, 0.0]},
            {"id": " 8 ", "position": [0.0, 0.0, 0.0], "orientation": [0.0, 0.0, 0.0]}
        ]}"#;
        let file: MarkerFile = serde_json::from_str(json).unwrap();
        let set = ModeledMarkers::from_records(&file.markers).unwrap();

        let m = set.get(7).unwrap();
        assert_eq!(m.position, Vector3::new(1.0, 0.0, 2.0));
        assert_relative_eq!(yaw_of(&m.rotation), 90f64.to_radians(), epsilon = 1e-12);
        assert!(set.contains(8));
    }

    #[test]
    fn records_survive_a_round_trip() {
        let records = vec![
            record("3", [0.5, 1.0, -2.0], [10.0, -45.0, 5.0]),
            record("11", [0.0, 0.0, 0.0], [0.0, 170.0, 0.0]),
        ];
        let set = ModeledMarkers::from_records(&records).unwrap();
        let back = set.to_records();

        assert_eq!(back[0].id, "3");
        assert_eq!(back[1].id, "11");
        for (a, b) in back.iter().zip([&records[0], &records[1]]) {
            for k in 0..3 {
                assert_relative_eq!(a.position[k], b.position[k], epsilon = 1e-12);
                assert_relative_eq!(a.orientation[k], b.orientation[k], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn bad_records_are_rejected() {
        let err = ModeledMarkers::from_records(&[record("x1", [0.0; 3], [0.0; 3])]).unwrap_err();
        assert_eq!(err, MarkerSetError::InvalidId("x1".into()));

        let err = ModeledMarkers::from_records(&[record("-2", [0.0; 3], [0.0; 3])]).unwrap_err();
        assert_eq!(err, MarkerSetError::InvalidId("-2".into()));

        let err = ModeledMarkers::from_records(&[
            record("1", [0.0; 3], [0.0; 3]),
            record("1", [1.0, 0.0, 0.0], [0.0; 3]),
        ])
        .unwrap_err();
        assert_eq!(err, MarkerSetError::DuplicateId(1));

        let err = ModeledMarkers::from_records(&[record("5", [f64::NAN, 0.0, 0.0], [0.0; 3])])
            .unwrap_err();
        assert_eq!(err, MarkerSetError::NonFinite(5));
    }
}
