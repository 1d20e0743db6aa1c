//! Host object tying the frame worker to the alignment state.

use std::time::Duration;

use log::error;

use crate::config::{ConfigError, SiteAlignConfig};
use crate::core::{CameraPose, ModelTransform};
use crate::pipeline::{
    DetectorFactory, FrameJob, FrameResult, FrameWorker, PipelineError, Submission, TagPipeline,
    WorkerError,
};
use crate::tracking::{CoordinateMatcher, SessionContext, WorkerTracker, WorkerUpdate};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// One inspection session: frames in, aligned model and worker reports out.
///
/// Frames are processed off-thread by a [`FrameWorker`]; a frame submitted
/// while another is in flight is dropped. Call [`pump`](Self::pump) once per
/// host tick to apply finished frames to the matcher.
pub struct SiteSession {
    worker: FrameWorker,
    matcher: CoordinateMatcher,
    tracker: WorkerTracker,
    fov: f64,
    tag_size: f64,
}

impl SiteSession {
    /// Load the dictionary and markers named by `config` and start the worker.
    pub fn from_config(
        config: &SiteAlignConfig,
        patrol_id: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let dictionary = config.load_dictionary()?;
        let context = SessionContext::new(config.load_markers()?, config.model_origin);
        let pipeline = TagPipeline::new(dictionary, &config.pipeline)?;
        Self::with_pipeline(pipeline, context, config, patrol_id)
    }

    pub fn with_pipeline<F: DetectorFactory>(
        pipeline: TagPipeline<F>,
        context: SessionContext,
        config: &SiteAlignConfig,
        patrol_id: impl Into<String>,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            worker: FrameWorker::spawn(pipeline)?,
            matcher: CoordinateMatcher::new(context, config.matcher),
            tracker: WorkerTracker::new(patrol_id, config.worker),
            fov: config.fov(),
            tag_size: config.tag_size,
        })
    }

    /// Hand an RGBA8 frame to the worker. Returns [`Submission::Dropped`]
    /// when the previous frame is still being processed.
    pub fn submit_frame(
        &mut self,
        pixels: Vec<u8>,
        width: usize,
        height: usize,
        camera: CameraPose,
    ) -> Result<Submission, SessionError> {
        Ok(self.worker.try_submit(FrameJob {
            pixels,
            width,
            height,
            fov: self.fov,
            tag_size: self.tag_size,
            camera,
        })?)
    }

    /// Apply every finished frame, oldest first. Returns how many frames
    /// reached the matcher; failed frames are logged and skipped.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn pump(&mut self) -> Result<usize, SessionError> {
        let mut applied = 0;
        loop {
            match self.worker.try_recv() {
                Ok(Some(result)) => applied += usize::from(self.apply(result)),
                Ok(None) | Err(WorkerError::ShutDown) => return Ok(applied),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Like [`pump`](Self::pump), but first waits up to `timeout` for an
    /// accepted frame whose result has not arrived yet.
    pub fn pump_timeout(&mut self, timeout: Duration) -> Result<usize, SessionError> {
        let mut applied = 0;
        if self.worker.has_pending() {
            match self.worker.recv_timeout(timeout) {
                Ok(Some(result)) => applied += usize::from(self.apply(result)),
                Ok(None) | Err(WorkerError::ShutDown) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(applied + self.pump()?)
    }

    fn apply(&mut self, result: FrameResult) -> bool {
        match result.poses {
            Ok(poses) => {
                self.matcher.update_detections(&poses, &result.camera);
                true
            }
            Err(e) => {
                error!("frame {} failed: {e}", result.sequence);
                false
            }
        }
    }

    /// Track the camera in model space. `None` until aligned or while the
    /// camera has not moved enough to report.
    pub fn observe_camera(&mut self, camera: &CameraPose) -> Option<WorkerUpdate> {
        self.tracker.observe(&self.matcher, camera)
    }

    pub fn is_busy(&self) -> bool {
        self.worker.is_busy()
    }

    pub fn is_ready(&self) -> bool {
        self.matcher.is_ready()
    }

    pub fn model_transform(&self) -> &ModelTransform {
        self.matcher.model_transform()
    }

    pub fn matcher(&self) -> &CoordinateMatcher {
        &self.matcher
    }

    pub fn tracker(&self) -> &WorkerTracker {
        &self.tracker
    }

    /// Stop the worker. Frames already finished can still be pumped.
    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }
}
