use crate::ImageError;

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, Default)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Allocate a `width × height` image filled with `value`.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

/// Convert a tightly packed RGBA8 frame into luminance, reusing `out`.
///
/// Uses fixed BT.601 integer weights so the conversion is deterministic
/// across platforms. The alpha channel is ignored.
pub fn rgba_to_luma(
    pixels: &[u8],
    width: usize,
    height: usize,
    out: &mut GrayImage,
) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(4))
        .ok_or(ImageError::InvalidDimensions { width, height })?;
    if pixels.len() != expected {
        return Err(ImageError::InvalidBuffer {
            expected,
            got: pixels.len(),
        });
    }

    out.width = width;
    out.height = height;
    out.data.clear();
    out.data.extend(pixels.chunks_exact(4).map(|px| {
        let r = px[0] as u32;
        let g = px[1] as u32;
        let b = px[2] as u32;
        ((77 * r + 150 * g + 29 * b + 128) >> 8) as u8
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_uses_fixed_weights() {
        let pixels = [
            255, 255, 255, 255, // white
            0, 0, 0, 255, // black
            255, 0, 0, 0, // red, alpha ignored
            0, 255, 0, 255, // green
        ];
        let mut out = GrayImage::default();
        rgba_to_luma(&pixels, 2, 2, &mut out).expect("convert");
        assert_eq!(out.width, 2);
        assert_eq!(out.height, 2);
        assert_eq!(out.data, vec![255, 0, 77, 149]);
    }

    #[test]
    fn luma_rejects_short_buffer() {
        let mut out = GrayImage::default();
        let err = rgba_to_luma(&[0u8; 12], 2, 2, &mut out).unwrap_err();
        assert_eq!(
            err,
            ImageError::InvalidBuffer {
                expected: 16,
                got: 12
            }
        );
    }

    #[test]
    fn luma_rejects_empty_frame() {
        let mut out = GrayImage::default();
        let err = rgba_to_luma(&[], 0, 4, &mut out).unwrap_err();
        assert_eq!(
            err,
            ImageError::InvalidDimensions {
                width: 0,
                height: 4
            }
        );
    }
}
