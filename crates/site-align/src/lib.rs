//! High-level facade for the `site-align-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates,
//! - a JSON [`SiteAlignConfig`] naming the tag family, the surveyed markers
//!   and the tuning of every stage,
//! - [`SiteSession`], the host object that runs frames off-thread and keeps
//!   the model aligned,
//! - offline [`replay`](replay::replay) of recorded detections,
//! - (feature `image`) helpers that run the pipeline on decoded images.
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::time::Duration;
//! use site_align::core::CameraPose;
//! use site_align::{SiteAlignConfig, SiteSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SiteAlignConfig::load_json("site/config.json")?;
//! let mut session = SiteSession::from_config(&config, "patrol-1")?;
//!
//! # let (pixels, width, height) = (vec![0u8; 640 * 480 * 4], 640, 480);
//! let camera = CameraPose::default();
//! session.submit_frame(pixels, width, height, camera)?;
//! session.pump_timeout(Duration::from_millis(100))?;
//! if let Some(update) = session.observe_camera(&camera) {
//!     println!("{}", serde_json::to_string(&update)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `site_align::core`: geometry, images, poses, logging and stage timings.
//! - `site_align::apriltag`: tag families and the square-tag detector.
//! - `site_align::pipeline`: frame pipeline, pose estimation, frame worker.
//! - `site_align::tracking`: pose filters, marker sets, matcher, worker tracker.
//! - `site_align::frames` (feature `image`): helpers for `image` buffers.

pub use site_align_apriltag as apriltag;
pub use site_align_core as core;
pub use site_align_pipeline as pipeline;
pub use site_align_tracking as tracking;

pub use site_align_core::{CameraPose, ModelTransform, TagPose};
pub use site_align_tracking::{CoordinateMatcher, WorkerUpdate};

mod config;
pub mod replay;
mod session;

pub use config::{ConfigError, SiteAlignConfig};
pub use session::{SessionError, SiteSession};

#[cfg(feature = "image")]
pub mod frames;
