//! Frame orchestration: luminance conversion, detection and the per-tag pose fan-out.

use std::cell::OnceCell;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use site_align_apriltag::{DetectError, DetectorParams, Dictionary, QuadTagDetector, TagDetector};
use site_align_core::{rgba_to_luma, GrayImage, StageTiming, TagPose, TimeProfile};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::pose::{estimate_tag_pose, CameraIntrinsics};
use crate::{PipelineError, PoseError};

/// Orchestrator tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Downsampling applied before detection, at least 1.
    pub decimation: u32,
    /// Worker pool size; `None` uses the platform-reported parallelism.
    pub threads: Option<usize>,
    pub detector: DetectorParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            decimation: 1,
            threads: None,
            detector: DetectorParams::default(),
        }
    }
}

/// Builds detectors bound to one frame geometry.
pub trait DetectorFactory: Send + 'static {
    type Detector: TagDetector + 'static;

    fn create(
        &self,
        width: usize,
        height: usize,
        decimation: u32,
    ) -> Result<Self::Detector, DetectError>;
}

/// Factory for the built-in [`QuadTagDetector`].
#[derive(Clone, Debug)]
pub struct QuadDetectorFactory {
    dictionary: Dictionary,
    params: DetectorParams,
}

impl QuadDetectorFactory {
    pub fn new(dictionary: Dictionary, params: DetectorParams) -> Self {
        Self { dictionary, params }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }
}

impl DetectorFactory for QuadDetectorFactory {
    type Detector = QuadTagDetector;

    fn create(
        &self,
        width: usize,
        height: usize,
        decimation: u32,
    ) -> Result<QuadTagDetector, DetectError> {
        QuadTagDetector::new(
            self.dictionary.clone(),
            self.params.clone(),
            width,
            height,
            decimation,
        )
    }
}

type FrameKey = (usize, usize, u32);

#[derive(Debug)]
struct DetectorSlot<D> {
    key: FrameKey,
    detector: D,
}

/// Turns RGBA frames into camera-space tag poses.
///
/// The detector is tied to `(width, height, decimation)`. When any of them
/// changes the old detector is dropped before the replacement is built, so at
/// most one set of detector buffers is alive at a time.
pub struct TagPipeline<F: DetectorFactory = QuadDetectorFactory> {
    factory: F,
    decimation: u32,
    pool: rayon::ThreadPool,
    slot: Option<DetectorSlot<F::Detector>>,
    gray: GrayImage,
    profile: TimeProfile,
    profile_data: OnceCell<Vec<StageTiming>>,
}

impl TagPipeline<QuadDetectorFactory> {
    pub fn new(dictionary: Dictionary, params: &PipelineParams) -> Result<Self, PipelineError> {
        let factory = QuadDetectorFactory::new(dictionary, params.detector.clone());
        Self::with_factory(factory, params)
    }
}

impl<F: DetectorFactory> TagPipeline<F> {
    pub fn with_factory(factory: F, params: &PipelineParams) -> Result<Self, PipelineError> {
        if params.decimation == 0 {
            return Err(DetectError::ZeroDecimation.into());
        }
        let threads = params.threads.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("site-align-pose-{i}"))
            .build()?;
        debug!("tag pipeline using {threads} worker threads");

        Ok(Self {
            factory,
            decimation: params.decimation,
            pool,
            slot: None,
            gray: GrayImage::default(),
            profile: TimeProfile::new(),
            profile_data: OnceCell::new(),
        })
    }

    #[inline]
    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    /// Takes effect on the next frame, which rebuilds the detector.
    pub fn set_decimation(&mut self, decimation: u32) -> Result<(), PipelineError> {
        if decimation == 0 {
            return Err(DetectError::ZeroDecimation.into());
        }
        self.decimation = decimation;
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Geometry the live detector was built for, if any.
    pub fn detector_key(&self) -> Option<(usize, usize, u32)> {
        self.slot.as_ref().map(|s| s.key)
    }

    pub fn detector(&self) -> Option<&F::Detector> {
        self.slot.as_ref().map(|s| &s.detector)
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Detect tags in one RGBA8 frame and estimate their camera-space poses.
    ///
    /// `fov` is the vertical field of view in radians and `tag_size` the
    /// physical side of the tag's black border. Poses come back in detector
    /// emission order. Any failure fails the whole frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = width, height = height))
    )]
    pub fn process_frame(
        &mut self,
        pixels: &[u8],
        width: usize,
        height: usize,
        fov: f64,
        tag_size: f64,
    ) -> Result<Vec<TagPose>, PipelineError> {
        self.profile_data.take();
        self.profile.reset();

        rgba_to_luma(pixels, width, height, &mut self.gray)?;
        let intrinsics = CameraIntrinsics::from_vertical_fov(width, height, fov)?;
        if !(tag_size.is_finite() && tag_size > 0.0) {
            return Err(PoseError::InvalidTagSize(tag_size).into());
        }
        self.profile.stamp("convert");

        let key = (width, height, self.decimation);
        let detector = ensure_detector(&mut self.slot, &self.factory, key)?;
        let gray = self.gray.view();
        let detections = self.pool.install(|| detector.detect(&gray))?;
        self.profile.stamp("detect");

        let poses = self.pool.install(|| {
            detections
                .par_iter()
                .with_max_len(1)
                .map(|d| estimate_tag_pose(d, &intrinsics, tag_size).map(|e| e.pose))
                .collect::<Result<Vec<_>, _>>()
        })?;
        self.profile.stamp("pose");

        debug!(
            "frame {width}x{height}: {} tags in {} us",
            poses.len(),
            self.profile.total().as_micros()
        );
        Ok(poses)
    }

    /// Stage timings of the most recent frame: `convert`, the detector's own
    /// stages, then `pose`.
    pub fn profile_data(&self) -> &[StageTiming] {
        self.profile_data.get_or_init(|| {
            let mut detector_stages = self
                .slot
                .as_ref()
                .map(|s| s.detector.time_profile())
                .filter(|p| !p.is_empty())
                .map(|p| p.durations());

            let mut out = Vec::new();
            for stage in self.profile.durations() {
                if stage.name == "detect" {
                    if let Some(inner) = detector_stages.take() {
                        out.extend(inner);
                        continue;
                    }
                }
                out.push(stage);
            }
            out
        })
    }

    /// Release the detector and frame buffers. Safe to call repeatedly; the
    /// next frame rebuilds what it needs.
    pub fn dispose(&mut self) {
        if let Some(old) = self.slot.take() {
            let (w, h, d) = old.key;
            info!("releasing tag detector for {w}x{h} (decimation {d})");
        }
        self.gray = GrayImage::default();
        self.profile.reset();
        self.profile_data.take();
    }
}

fn ensure_detector<'a, F: DetectorFactory>(
    slot: &'a mut Option<DetectorSlot<F::Detector>>,
    factory: &F,
    key: FrameKey,
) -> Result<&'a mut F::Detector, DetectError> {
    let live = match slot.take() {
        Some(live) if live.key == key => live,
        stale => {
            if let Some(old) = stale {
                let (w, h, d) = old.key;
                drop(old);
                info!("released tag detector for {w}x{h} (decimation {d})");
            }
            let (w, h, d) = key;
            let detector = factory.create(w, h, d)?;
            info!("created tag detector for {w}x{h} (decimation {d})");
            DetectorSlot { key, detector }
        }
    };
    Ok(&mut slot.insert(live).detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_align_apriltag::RawDetection;
    use std::sync::{Arc, Mutex};

    type Events = Arc<Mutex<Vec<String>>>;

    struct RecordingDetector {
        key: FrameKey,
        events: Events,
        profile: TimeProfile,
    }

    impl TagDetector for RecordingDetector {
        fn detect(
            &mut self,
            image: &site_align_core::GrayImageView<'_>,
        ) -> Result<Vec<RawDetection>, DetectError> {
            assert_eq!((image.width, image.height), (self.key.0, self.key.1));
            self.profile.reset();
            self.profile.stamp("scan");
            Ok(Vec::new())
        }

        fn time_profile(&self) -> &TimeProfile {
            &self.profile
        }
    }

    impl Drop for RecordingDetector {
        fn drop(&mut self) {
            let (w, h, d) = self.key;
            self.events.lock().unwrap().push(format!("drop {w}x{h}/{d}"));
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        events: Events,
    }

    impl DetectorFactory for RecordingFactory {
        type Detector = RecordingDetector;

        fn create(&self, w: usize, h: usize, d: u32) -> Result<RecordingDetector, DetectError> {
            if d == 0 {
                return Err(DetectError::ZeroDecimation);
            }
            self.events.lock().unwrap().push(format!("create {w}x{h}/{d}"));
            Ok(RecordingDetector {
                key: (w, h, d),
                events: self.events.clone(),
                profile: TimeProfile::new(),
            })
        }
    }

    fn drain(events: &Events) -> Vec<String> {
        std::mem::take(&mut *events.lock().unwrap())
    }

    fn frame(w: usize, h: usize) -> Vec<u8> {
        vec![200; w * h * 4]
    }

    fn pipeline() -> (TagPipeline<RecordingFactory>, Events) {
        let factory = RecordingFactory::default();
        let events = factory.events.clone();
        let params = PipelineParams {
            threads: Some(2),
            ..PipelineParams::default()
        };
        (TagPipeline::with_factory(factory, &params).unwrap(), events)
    }

    #[test]
    fn empty_frame_yields_no_poses() {
        let (mut p, _) = pipeline();
        let poses = p.process_frame(&frame(32, 24), 32, 24, 1.0, 0.1).unwrap();
        assert!(poses.is_empty());
        assert_eq!(p.thread_count(), 2);
    }

    #[test]
    fn detector_is_recreated_only_when_geometry_changes() {
        let (mut p, events) = pipeline();

        p.process_frame(&frame(32, 24), 32, 24, 1.0, 0.1).unwrap();
        p.process_frame(&frame(32, 24), 32, 24, 1.0, 0.1).unwrap();
        assert_eq!(drain(&events), ["create 32x24/1"]);

        p.process_frame(&frame(40, 24), 40, 24, 1.0, 0.1).unwrap();
        assert_eq!(drain(&events), ["drop 32x24/1", "create 40x24/1"]);

        p.set_decimation(2).unwrap();
        assert_eq!(p.detector_key(), Some((40, 24, 1)));
        p.process_frame(&frame(40, 24), 40, 24, 1.0, 0.1).unwrap();
        assert_eq!(drain(&events), ["drop 40x24/1", "create 40x24/2"]);
        assert_eq!(p.detector_key(), Some((40, 24, 2)));
    }

    #[test]
    fn dispose_is_idempotent_and_next_frame_rebuilds() {
        let (mut p, events) = pipeline();
        p.dispose();
        assert!(drain(&events).is_empty());

        p.process_frame(&frame(32, 24), 32, 24, 1.0, 0.1).unwrap();
        p.dispose();
        p.dispose();
        assert_eq!(drain(&events), ["create 32x24/1", "drop 32x24/1"]);
        assert!(p.detector().is_none());

        p.process_frame(&frame(32, 24), 32, 24, 1.0, 0.1).unwrap();
        assert_eq!(drain(&events), ["create 32x24/1"]);
    }

    #[test]
    fn profile_splices_detector_stages() {
        let (mut p, _) = pipeline();
        assert!(p.profile_data().is_empty());

        p.process_frame(&frame(32, 24), 32, 24, 1.0, 0.1).unwrap();
        let names: Vec<_> = p.profile_data().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["convert", "scan", "pose"]);
    }

    #[test]
    fn malformed_frames_fail_the_call() {
        let (mut p, events) = pipeline();

        let err = p.process_frame(&[], 0, 24, 1.0, 0.1).unwrap_err();
        assert!(matches!(err, PipelineError::Image(_)));

        let err = p.process_frame(&frame(32, 23), 32, 24, 1.0, 0.1).unwrap_err();
        assert!(matches!(err, PipelineError::Image(_)));

        let err = p.process_frame(&frame(32, 24), 32, 24, 0.0, 0.1).unwrap_err();
        assert!(matches!(err, PipelineError::Pose(PoseError::InvalidFov(_))));

        let err = p.process_frame(&frame(32, 24), 32, 24, 1.0, -1.0).unwrap_err();
        assert!(matches!(err, PipelineError::Pose(PoseError::InvalidTagSize(_))));

        assert!(drain(&events).is_empty());
    }

    #[test]
    fn zero_decimation_is_rejected() {
        let (mut p, _) = pipeline();
        assert!(matches!(
            p.set_decimation(0),
            Err(PipelineError::Detect(DetectError::ZeroDecimation))
        ));
        let params = PipelineParams {
            decimation: 0,
            ..PipelineParams::default()
        };
        assert!(TagPipeline::with_factory(RecordingFactory::default(), &params).is_err());
    }
}
