//! Temporal smoothing of tag detections and model-to-session alignment.
//!
//! - [`PoseFilter`]: per-tag EMA with a sample-count and dispersion gate.
//! - [`ModeledMarkers`] / [`SessionContext`]: the surveyed markers a session
//!   aligns against, passed in explicitly.
//! - [`CoordinateMatcher`]: center-tag selection plus single-tag and two-tag
//!   alignment of the model root.
//! - [`WorkerTracker`]: camera trail and position reports in model space.
//!
//! All types here are single-threaded; the host feeds them from one thread in
//! frame order.

mod filter;
mod markers;
mod matcher;
mod session;
mod worker;

pub use filter::{FilterParams, PoseFilter, MIN_CONFIDENT_SAMPLES, SAMPLE_CAPACITY};
pub use markers::{MarkerFile, MarkerRecord, MarkerSetError, ModeledMarkers};
pub use matcher::{AlignmentOffset, CenterTag, CoordinateMatcher, MatcherParams};
pub use session::SessionContext;
pub use worker::{WorkerTracker, WorkerTrackerParams, WorkerUpdate};
