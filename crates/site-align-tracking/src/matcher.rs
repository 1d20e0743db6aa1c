//! Model-to-session alignment from smoothed tag detections.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use site_align_core::{
    from_to_rotation, wrap_angle, yaw_of, yaw_rotation, CameraPose, ModelTransform, TagPose,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::filter::{FilterParams, PoseFilter};
use crate::SessionContext;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    /// EMA weight shared by the detection and offset filters.
    pub smoothing_factor: f64,
    /// Position standard deviation above which a filter is not trusted.
    pub dispersion_threshold: f64,
    /// Smallest modeled separation of a usable two-tag pair.
    pub min_two_tag_distance: f64,
    /// Yaw added to single-tag alignments; depends on how tags are mounted
    /// relative to the model's markers.
    pub single_tag_yaw_offset_deg: f64,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.1,
            dispersion_threshold: 0.05,
            min_two_tag_distance: 0.5,
            single_tag_yaw_offset_deg: 180.0,
        }
    }
}

impl MatcherParams {
    fn filter_params(&self) -> FilterParams {
        FilterParams {
            smoothing_factor: self.smoothing_factor,
            dispersion_threshold: self.dispersion_threshold,
        }
    }
}

/// Rigid model-to-session offset anchored at one tag.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOffset {
    pub translation: Vector3<f64>,
    /// Radians about +Y, in `(-π, π]`.
    pub yaw: f64,
}

impl AlignmentOffset {
    pub fn yaw_degrees(&self) -> f64 {
        self.yaw.to_degrees()
    }
}

/// The tag the model is rotated about.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CenterTag {
    pub id: u32,
    /// Camera distance when last seen.
    pub distance: f64,
}

/// Keeps a surveyed model aligned with the live AR session.
///
/// Feed it every frame's camera-space tag poses with
/// [`update_detections`](Self::update_detections). Each tag is smoothed by
/// its own [`PoseFilter`]; confident tags produce an alignment offset from a
/// single tag (translation plus relative yaw) or, once any suitably separated
/// pair has been seen together, from two tags (translation plus the yaw
/// between their modeled and detected directions). Two-tag mode is sticky.
/// The published [`model_transform`](Self::model_transform) only changes when
/// the center tag's offset filter is confident.
#[derive(Clone, Debug)]
pub struct CoordinateMatcher {
    params: MatcherParams,
    context: SessionContext,
    detection_filters: HashMap<u32, PoseFilter>,
    offset_filters: HashMap<u32, PoseFilter>,
    detected: BTreeMap<u32, TagPose>,
    unknown_warned: HashSet<u32>,
    center: Option<CenterTag>,
    two_tag: bool,
    ready: bool,
    model: ModelTransform,
}

impl CoordinateMatcher {
    pub fn new(context: SessionContext, params: MatcherParams) -> Self {
        let model = context.model_origin;
        Self {
            params,
            context,
            detection_filters: HashMap::new(),
            offset_filters: HashMap::new(),
            detected: BTreeMap::new(),
            unknown_warned: HashSet::new(),
            center: None,
            two_tag: false,
            ready: false,
            model,
        }
    }

    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// True once a model transform has been published. Never reverts.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_two_tag_mode(&self) -> bool {
        self.two_tag
    }

    pub fn center_tag(&self) -> Option<CenterTag> {
        self.center
    }

    /// Latest confident, smoothed session-space pose of every tag seen so far.
    pub fn detected_markers(&self) -> &BTreeMap<u32, TagPose> {
        &self.detected
    }

    /// Current placement of the model root in session space.
    pub fn model_transform(&self) -> &ModelTransform {
        &self.model
    }

    pub fn detection_filter(&self, id: u32) -> Option<&PoseFilter> {
        self.detection_filters.get(&id)
    }

    pub fn offset_filter(&self, id: u32) -> Option<&PoseFilter> {
        self.offset_filters.get(&id)
    }

    /// Smoothed offset of the center tag, if its offset filter is confident.
    pub fn current_offset(&self) -> Option<AlignmentOffset> {
        let center = self.center?;
        let filter = self
            .offset_filters
            .get(&center.id)
            .filter(|f| f.is_confident())?;
        Some(AlignmentOffset {
            translation: filter.filtered_position()?,
            yaw: yaw_of(&filter.filtered_rotation()?),
        })
    }

    /// Process one frame of camera-space tag poses taken at `camera`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(tags = poses.len()))
    )]
    pub fn update_detections(&mut self, poses: &[TagPose], camera: &CameraPose) {
        for pose in poses {
            self.update_center(pose);

            let session = camera.to_session(pose);
            let filter_params = self.params.filter_params();
            let filter = self
                .detection_filters
                .entry(pose.id)
                .or_insert_with(|| PoseFilter::new(filter_params));
            filter.update(session.position, session.rotation);
            if !filter.is_confident() {
                continue;
            }
            let (Some(position), Some(rotation)) =
                (filter.filtered_position(), filter.filtered_rotation())
            else {
                continue;
            };
            let detected = TagPose::new(pose.id, position, rotation);
            self.detected.insert(pose.id, detected);

            let Some(modeled) = self.context.markers.get(pose.id).copied() else {
                if self.unknown_warned.insert(pose.id) {
                    warn!("tag {} is not part of the modeled marker set", pose.id);
                }
                continue;
            };

            if !self.two_tag {
                self.align_with_one_tag(&modeled, &detected);
            }
            self.align_with_partners(&modeled, &detected);
        }

        self.publish();
    }

    fn update_center(&mut self, pose: &TagPose) {
        let distance = pose.distance();
        match &mut self.center {
            Some(center) if center.id == pose.id => center.distance = distance,
            Some(center) if distance >= center.distance => {}
            center => {
                if center.is_some() {
                    debug!("center tag -> {} ({distance:.3} m)", pose.id);
                }
                *center = Some(CenterTag {
                    id: pose.id,
                    distance,
                });
            }
        }
    }

    fn align_with_one_tag(&mut self, modeled: &TagPose, detected: &TagPose) {
        let translation = detected.position - modeled.position;
        let relative = modeled.rotation.inverse() * detected.rotation;
        let yaw = wrap_angle(yaw_of(&relative) + self.params.single_tag_yaw_offset_deg.to_radians());
        self.feed_offset(modeled.id, translation, yaw);
    }

    fn align_with_partners(&mut self, modeled: &TagPose, detected: &TagPose) {
        let partners: Vec<u32> = self
            .context
            .markers
            .partners(modeled.id, self.params.min_two_tag_distance)
            .collect();

        for partner in partners {
            if !self
                .detection_filters
                .get(&partner)
                .is_some_and(|f| f.is_confident())
            {
                continue;
            }
            let (Some(modeled2), Some(detected2)) = (
                self.context.markers.get(partner).copied(),
                self.detected.get(&partner).copied(),
            ) else {
                continue;
            };

            let translation = detected.position - modeled.position;
            let modeled_dir = modeled2.position - modeled.position;
            let detected_dir = detected2.position - detected.position;
            let yaw = yaw_of(&from_to_rotation(&modeled_dir, &detected_dir));
            self.feed_offset(modeled.id, translation, yaw);

            if !self.two_tag {
                info!(
                    "two-tag alignment engaged with tags {} and {partner}",
                    modeled.id
                );
                self.two_tag = true;
            }
        }
    }

    fn feed_offset(&mut self, id: u32, translation: Vector3<f64>, yaw: f64) {
        let filter_params = self.params.filter_params();
        self.offset_filters
            .entry(id)
            .or_insert_with(|| PoseFilter::new(filter_params))
            .update(translation, yaw_rotation(yaw));
    }

    fn publish(&mut self) {
        let Some(center) = self.center else {
            return;
        };
        let Some(pivot) = self.detected.get(&center.id).map(|p| p.position) else {
            return;
        };
        let Some(offset) = self.current_offset() else {
            return;
        };

        let origin = self.context.model_origin;
        let mut model = ModelTransform::new(origin.translation + offset.translation, origin.rotation);
        model.rotate_around(&pivot, offset.yaw);
        self.model = model;

        if !self.ready {
            info!(
                "model aligned on tag {} (yaw {:.1} deg)",
                center.id,
                offset.yaw_degrees()
            );
            self.ready = true;
        }
    }
}
