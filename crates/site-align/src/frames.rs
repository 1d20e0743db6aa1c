//! Helpers for feeding `image` crate buffers into the pipeline.

use std::path::Path;

use crate::core::{GrayImageView, TagPose};
use crate::pipeline::{PipelineError, TagPipeline};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("failed to open image: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// An RGBA8 frame in the layout the pipeline consumes.
#[derive(Clone, Debug)]
pub struct RgbaFrame {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl RgbaFrame {
    pub fn from_image(img: &::image::DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width() as usize,
            height: rgba.height() as usize,
            pixels: rgba.into_raw(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let img = ::image::ImageReader::open(path)?.decode()?;
        Ok(Self::from_image(&img))
    }
}

/// Borrow an `image::GrayImage` as the core view type.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Run the pipeline on one decoded image. Poses are in camera space.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(pipeline, img), fields(width = img.width(), height = img.height()))
)]
pub fn detect_image(
    pipeline: &mut TagPipeline,
    img: &::image::DynamicImage,
    fov: f64,
    tag_size: f64,
) -> Result<Vec<TagPose>, FrameError> {
    let frame = RgbaFrame::from_image(img);
    Ok(pipeline.process_frame(&frame.pixels, frame.width, frame.height, fov, tag_size)?)
}
