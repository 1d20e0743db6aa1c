/// Errors returned while building or running a tag detector.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("invalid dictionary: {0}")]
    InvalidDictionary(String),
    #[error("decimation factor must be at least 1")]
    ZeroDecimation,
    #[error("image {width}x{height} is too small for decimation {decimation}")]
    ImageTooSmall {
        width: usize,
        height: usize,
        decimation: u32,
    },
    #[error("detector built for {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
    #[error("luminance buffer has {got} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, got: usize },
    #[error("tag id {0} is not in the dictionary")]
    UnknownId(u32),
    #[error("tag corners do not span a valid quad")]
    DegenerateQuad,
}
