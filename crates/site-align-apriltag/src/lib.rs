//! Square fiducial (AprilTag-style) detection in pure Rust.
//!
//! The detector works on a luminance frame:
//! 1. box decimation,
//! 2. tile-based adaptive threshold,
//! 3. dark connected components and a four-corner fit on their convex hulls,
//! 4. payload sampling through the quad homography and dictionary matching.
//!
//! Tag families are supplied as data ([`Dictionary`]); this crate does not
//! generate them. The [`TagDetector`] trait is the seam the pipeline uses, so
//! a different backend can be plugged in without touching pose estimation.
//!
//! ```
//! use nalgebra::Point2;
//! use site_align_apriltag::{
//!     synthetic, DetectorParams, Dictionary, QuadTagDetector, TagDetector,
//! };
//! use site_align_core::GrayImage;
//!
//! let dict = Dictionary::new("demo", 4, 2, vec![0x9c92, 0xc565]).unwrap();
//! let mut img = GrayImage::filled(160, 120, synthetic::PAPER);
//! let corners = synthetic::frontal_corners(Point2::new(80.0, 60.0), 48.0, 0);
//! synthetic::render_tag(&mut img, &dict, 1, &corners, 1.0).unwrap();
//!
//! let mut det = QuadTagDetector::new(dict, DetectorParams::default(), 160, 120, 1).unwrap();
//! let found = det.detect(&img.view()).unwrap();
//! assert_eq!(found[0].id, 1);
//! ```

mod decode;
mod detector;
mod dictionary;
mod error;
mod matcher;
mod quad;
pub mod synthetic;
mod threshold;

pub use decode::tag_square;
pub use detector::{DetectorParams, QuadTagDetector, RawDetection, TagDetector};
pub use dictionary::Dictionary;
pub use error::DetectError;
pub use matcher::{rotate_code_u64, Match, Matcher};
