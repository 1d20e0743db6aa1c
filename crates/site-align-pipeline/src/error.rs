use site_align_apriltag::DetectError;
use site_align_core::ImageError;

/// Errors returned by the tag pose solver.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("vertical field of view must lie in (0, pi), got {0}")]
    InvalidFov(f64),
    #[error("tag size must be positive, got {0}")]
    InvalidTagSize(f64),
    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
    #[error("pose of tag {id} is degenerate")]
    Degenerate { id: u32 },
}

/// Errors that fail a whole [`process_frame`](crate::TagPipeline::process_frame) call.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Pose(#[from] PoseError),
    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Errors raised by the background [`FrameWorker`](crate::FrameWorker).
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn frame worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("frame worker stopped unexpectedly")]
    Disconnected,
    #[error("frame worker has been shut down")]
    ShutDown,
}
