//! From RGBA camera frames to camera-space tag poses.
//!
//! [`TagPipeline`] converts a frame to luminance, runs a [`TagDetector`]
//! and estimates every tag's pose in parallel on its own rayon pool.
//! [`FrameWorker`] hosts a pipeline on a background thread with a single-slot
//! admission policy: frames that arrive while one is in flight are dropped.
//!
//! [`TagDetector`]: site_align_apriltag::TagDetector
//!
//! ```no_run
//! use site_align_apriltag::Dictionary;
//! use site_align_pipeline::{PipelineParams, TagPipeline};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dict: Dictionary = serde_json::from_str(&std::fs::read_to_string("family.json")?)?;
//! let mut pipeline = TagPipeline::new(dict, &PipelineParams::default())?;
//! let rgba = vec![0u8; 640 * 480 * 4];
//! let poses = pipeline.process_frame(&rgba, 640, 480, 60f64.to_radians(), 0.1)?;
//! for p in &poses {
//!     println!("tag {} at {:?}", p.id, p.position);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod pipeline;
mod pose;
mod worker;

pub use error::{PipelineError, PoseError, WorkerError};
pub use pipeline::{DetectorFactory, PipelineParams, QuadDetectorFactory, TagPipeline};
pub use pose::{estimate_tag_pose, CameraIntrinsics, PoseEstimate};
pub use worker::{FrameJob, FrameResult, FrameWorker, Submission};
