//! Core types and utilities for fiducial-based model alignment.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete tag detector, camera API or image type.
//!
//! Frames used across the workspace:
//! - **pixel space**: pixel `i` covers `[i, i + 1)`, y grows downwards;
//! - **camera space**: x right, y up, z forward (the tag poses produced by the
//!   pose estimator);
//! - **session space**: the live AR tracking frame the camera pose is given in;
//! - **model space**: the surveyed frame of the building model.

mod geometry;
mod homography;
mod image;
mod logger;
mod pose;
mod profile;

pub use geometry::{
    euler_zxy_degrees, from_to_rotation, wrap_angle, yaw_of, yaw_rotation, ModelTransform,
};
pub use homography::{homography_from_4pt, Homography};
pub use image::{rgba_to_luma, GrayImage, GrayImageView};
pub use pose::{CameraPose, TagPose};
pub use profile::{StageTiming, TimeProfile};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

/// Errors raised when a raw pixel buffer does not describe the frame it claims to.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
    #[error("invalid pixel buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },
}
