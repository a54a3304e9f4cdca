//! Image intake.
//!
//! Turns uploaded bytes into an owned RGB buffer that detector backends can
//! read. Everything that can go wrong here is an `InvalidImage` and happens
//! before any inference is attempted.

use image::GenericImageView;

use crate::error::{SignalError, SignalResult};

/// Decoded RGB24 image, row-major, three bytes per pixel.
///
/// The pixel buffer is private; backends read it through `rgb()`.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl DecodedImage {
    /// Wrap an already-decoded RGB24 buffer, validating its length.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> SignalResult<Self> {
        if width == 0 || height == 0 {
            return Err(SignalError::InvalidImage(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| SignalError::InvalidImage("image dimensions overflow".to_string()))?;
        if pixels.len() != expected {
            return Err(SignalError::InvalidImage(format!(
                "RGB length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only view of the RGB24 pixels.
    pub fn rgb(&self) -> &[u8] {
        &self.pixels
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is never logged.
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Decode an encoded image (JPEG or PNG) into RGB24.
pub fn decode_image(bytes: &[u8]) -> SignalResult<DecodedImage> {
    if bytes.is_empty() {
        return Err(SignalError::InvalidImage("no image data".to_string()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| SignalError::InvalidImage(format!("decode failed: {}", e)))?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    DecodedImage::from_rgb(rgb.into_raw(), width, height)
}

/// Read and decode an image file from local disk.
pub fn load_image_file(path: &std::path::Path) -> SignalResult<DecodedImage> {
    let bytes = std::fs::read(path).map_err(|e| {
        SignalError::InvalidImage(format!("failed to read {}: {}", path.display(), e))
    })?;
    decode_image(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn decodes_png_to_rgb() {
        let decoded = decode_image(&png_bytes(4, 3)).unwrap();
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 3);
        assert_eq!(decoded.rgb().len(), 4 * 3 * 3);
        assert_eq!(&decoded.rgb()[..3], &[10, 20, 30]);
    }

    #[test]
    fn empty_bytes_are_invalid_image() {
        let err = decode_image(&[]).unwrap_err();
        assert!(matches!(err, SignalError::InvalidImage(_)));
    }

    #[test]
    fn garbage_bytes_are_invalid_image() {
        let err = decode_image(b"definitely not a jpeg").unwrap_err();
        assert!(matches!(err, SignalError::InvalidImage(_)));
    }

    #[test]
    fn from_rgb_validates_length() {
        assert!(DecodedImage::from_rgb(vec![0u8; 9], 1, 3).is_ok());
        assert!(matches!(
            DecodedImage::from_rgb(vec![0u8; 8], 1, 3),
            Err(SignalError::InvalidImage(_))
        ));
        assert!(matches!(
            DecodedImage::from_rgb(Vec::new(), 0, 0),
            Err(SignalError::InvalidImage(_))
        ));
    }

    #[test]
    fn missing_file_is_invalid_image() {
        let err = load_image_file(std::path::Path::new("/nonexistent/scene.jpg")).unwrap_err();
        assert!(matches!(err, SignalError::InvalidImage(_)));
    }
}
