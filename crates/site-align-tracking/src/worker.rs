//! Camera trail and position reports in model coordinates.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use site_align_core::{wrap_angle, yaw_of, CameraPose, ModelTransform};

use crate::CoordinateMatcher;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTrackerParams {
    /// Camera travel needed before a new breadcrumb is recorded.
    pub min_path_step: f64,
    /// Position change that triggers a new report.
    pub position_threshold: f64,
    /// Yaw change, in degrees, that triggers a new report.
    pub yaw_threshold_deg: f64,
}

impl Default for WorkerTrackerParams {
    fn default() -> Self {
        Self {
            min_path_step: 0.1,
            position_threshold: 0.01,
            yaw_threshold_deg: 0.5,
        }
    }
}

/// Live position report of one worker, in model space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerUpdate {
    pub patrol_id: String,
    pub position: [f64; 3],
    /// Yaw in degrees.
    pub orientation: f64,
}

/// Follows the camera once the model is aligned.
///
/// Positions are expressed relative to the model root so reports stay valid
/// across AR sessions. A report is emitted when the camera has moved or turned
/// past the configured thresholds since the previous report.
#[derive(Clone, Debug)]
pub struct WorkerTracker {
    params: WorkerTrackerParams,
    patrol_id: String,
    path: Vec<Point3<f64>>,
    current: Option<(Point3<f64>, f64)>,
    last_sent: Option<(Point3<f64>, f64)>,
}

impl WorkerTracker {
    pub fn new(patrol_id: impl Into<String>, params: WorkerTrackerParams) -> Self {
        Self {
            params,
            patrol_id: patrol_id.into(),
            path: Vec::new(),
            current: None,
            last_sent: None,
        }
    }

    pub fn patrol_id(&self) -> &str {
        &self.patrol_id
    }

    /// Breadcrumbs in model space, oldest first.
    pub fn path(&self) -> &[Point3<f64>] {
        &self.path
    }

    /// Breadcrumbs placed in session space through `model`.
    pub fn session_path(&self, model: &ModelTransform) -> Vec<Point3<f64>> {
        self.path.iter().map(|p| model.transform_point(p)).collect()
    }

    /// Latest camera position and yaw (degrees) in model space.
    pub fn current(&self) -> Option<(Point3<f64>, f64)> {
        self.current
    }

    /// Feed the camera pose of the current frame. Returns a report when one is due.
    pub fn observe(
        &mut self,
        matcher: &CoordinateMatcher,
        camera: &CameraPose,
    ) -> Option<WorkerUpdate> {
        if !matcher.is_ready() {
            return None;
        }
        let model = matcher.model_transform();
        let position = model.inverse_transform_point(&Point3::from(camera.position));
        let yaw = yaw_of(&(model.rotation.inverse() * camera.rotation)).to_degrees();
        self.current = Some((position, yaw));

        let moved_far = self
            .path
            .last()
            .map_or(true, |last| (position - last).norm() >= self.params.min_path_step);
        if moved_far {
            self.path.push(position);
        }

        let due = match self.last_sent {
            None => true,
            Some((p, y)) => {
                (position - p).norm() > self.params.position_threshold
                    || wrap_angle((yaw - y).to_radians()).abs().to_degrees()
                        > self.params.yaw_threshold_deg
            }
        };
        if !due {
            return None;
        }
        self.last_sent = Some((position, yaw));
        Some(WorkerUpdate {
            patrol_id: self.patrol_id.clone(),
            position: [position.x, position.y, position.z],
            orientation: yaw,
        })
    }
}
