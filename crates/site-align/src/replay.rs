//! Offline replay of recorded tag detections through the matcher.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{read_json, ConfigError, SiteAlignConfig};
use crate::core::{CameraPose, ModelTransform, TagPose};
use crate::tracking::{
    AlignmentOffset, CenterTag, CoordinateMatcher, SessionContext, WorkerTracker, WorkerUpdate,
};

/// One recorded frame: the camera pose and the camera-space tag poses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub camera: CameraPose,
    #[serde(default)]
    pub tags: Vec<TagPose>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    pub frames: Vec<ReplayFrame>,
}

impl ReplayLog {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

/// Matcher state after the last replayed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub ready: bool,
    pub two_tag: bool,
    pub center_tag: Option<CenterTag>,
    pub offset: Option<AlignmentOffset>,
    pub model_transform: ModelTransform,
    /// Worker reports emitted along the way, in frame order.
    pub updates: Vec<WorkerUpdate>,
}

/// Feed every frame of `log` to a fresh matcher and worker tracker.
pub fn replay(
    log: &ReplayLog,
    context: SessionContext,
    config: &SiteAlignConfig,
    patrol_id: &str,
) -> ReplaySummary {
    let mut matcher = CoordinateMatcher::new(context, config.matcher);
    let mut tracker = WorkerTracker::new(patrol_id, config.worker);
    let mut updates = Vec::new();
    for frame in &log.frames {
        matcher.update_detections(&frame.tags, &frame.camera);
        updates.extend(tracker.observe(&matcher, &frame.camera));
    }
    ReplaySummary {
        frames: log.frames.len(),
        ready: matcher.is_ready(),
        two_tag: matcher.is_two_tag_mode(),
        center_tag: matcher.center_tag(),
        offset: matcher.current_offset(),
        model_transform: *matcher.model_transform(),
        updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::ModeledMarkers;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn context() -> SessionContext {
        let markers = ModeledMarkers::new([
            TagPose::new(1, Vector3::zeros(), UnitQuaternion::identity()),
            TagPose::new(2, Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
        ])
        .unwrap();
        SessionContext::new(markers, ModelTransform::identity())
    }

    fn frame(camera_x: f64) -> ReplayFrame {
        // Site shifted by +0.5 m along z; camera walks along x.
        let camera = CameraPose::new(Vector3::new(camera_x, 0.0, 0.0), UnitQuaternion::identity());
        ReplayFrame {
            camera,
            tags: vec![
                TagPose::new(1, Vector3::new(-camera_x, 0.0, 0.5), UnitQuaternion::identity()),
                TagPose::new(2, Vector3::new(1.0 - camera_x, 0.0, 0.5), UnitQuaternion::identity()),
            ],
        }
    }

    #[test]
    fn empty_log_leaves_the_model_at_its_origin() {
        let s = replay(&ReplayLog::default(), context(), &SiteAlignConfig::default(), "p");
        assert_eq!(s.frames, 0);
        assert!(!s.ready);
        assert!(s.center_tag.is_none());
        assert_eq!(s.model_transform, ModelTransform::identity());
    }

    #[test]
    fn walking_camera_aligns_and_reports() {
        let log = ReplayLog {
            frames: (0..200).map(|k| frame(0.005 * k as f64)).collect(),
        };
        let s = replay(&log, context(), &SiteAlignConfig::default(), "patrol-7");

        assert!(s.ready);
        assert!(s.two_tag);
        assert_relative_eq!(
            s.model_transform.translation,
            Vector3::new(0.0, 0.0, 0.5),
            epsilon = 1e-3
        );
        assert!(!s.updates.is_empty());
        let last = s.updates.last().unwrap();
        assert_eq!(last.patrol_id, "patrol-7");
        assert_relative_eq!(last.position[2], -0.5, epsilon = 1e-3);
    }

    #[test]
    fn log_parses_from_json() {
        let json = r#"{"frames": [{
            "camera": {"position": [0.0, 1.6, 0.0], "rotation": [0.0, 0.0, 0.0, 1.0]},
            "tags": [{"id": 3, "position": [0.0, 0.0, 1.0], "rotation": [0.0, 0.0, 0.0, 1.0]}]
        }, {
            "camera": {"position": [0.0, 1.6, 0.0], "rotation": [0.0, 0.0, 0.0, 1.0]}
        }]}"#;
        let log: ReplayLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.frames.len(), 2);
        assert_eq!(log.frames[0].tags[0].id, 3);
        assert!(log.frames[1].tags.is_empty());
    }

    #[test]
    fn log_rotations_are_normalised_on_load() {
        let json = r#"{"frames": [{
            "camera": {"position": [0.0, 0.0, 0.0], "rotation": [0.0, 0.0, 0.0, 2.0]},
            "tags": [{"id": 1, "position": [0.0, 0.0, 1.0], "rotation": [0.0, 0.0, 0.0, 3.0]}]
        }]}"#;
        let log: ReplayLog = serde_json::from_str(json).unwrap();
        assert_relative_eq!(log.frames[0].camera.rotation.quaternion().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(log.frames[0].tags[0].rotation.quaternion().norm(), 1.0, epsilon = 1e-12);

        let zero = json.replace("[0.0, 0.0, 0.0, 3.0]", "[0.0, 0.0, 0.0, 0.0]");
        assert!(serde_json::from_str::<ReplayLog>(&zero).is_err());
    }
}
