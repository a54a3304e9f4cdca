//! Letterbox preprocessing for square-input detectors.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::result::BoundingBox;
use crate::intake::DecodedImage;

const PAD_VALUE: u8 = 114;

/// Mapping between letterboxed model coordinates and source pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl LetterboxTransform {
    pub fn new(source_width: u32, source_height: u32, size: u32) -> Self {
        let scale = (size as f32 / source_width as f32).min(size as f32 / source_height as f32);
        let scaled_w = (source_width as f32 * scale).round();
        let scaled_h = (source_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((size as f32 - scaled_h) / 2.0).floor(),
            source_width,
            source_height,
        }
    }

    fn scaled_dims(&self) -> (u32, u32) {
        (
            ((self.source_width as f32 * self.scale).round() as u32).max(1),
            ((self.source_height as f32 * self.scale).round() as u32).max(1),
        )
    }

    /// Map a center-format box in model space back to clamped source pixels.
    pub fn to_source(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let cx = (cx - self.pad_x) / self.scale;
        let cy = (cy - self.pad_y) / self.scale;
        let w = w / self.scale;
        let h = h / self.scale;
        let max_x = self.source_width as f32;
        let max_y = self.source_height as f32;
        let b = BoundingBox::from_center(cx, cy, w, h);
        BoundingBox::new(
            b.x1.clamp(0.0, max_x),
            b.y1.clamp(0.0, max_y),
            b.x2.clamp(0.0, max_x),
            b.y2.clamp(0.0, max_y),
        )
    }
}

/// Resize with preserved aspect ratio, pad to `size`x`size`, and lay out as
/// normalised NCHW `f32`.
pub fn letterbox(image: &DecodedImage, size: u32) -> Result<(Vec<f32>, LetterboxTransform)> {
    if size == 0 {
        return Err(anyhow!("letterbox size must be positive"));
    }
    let source = RgbImage::from_raw(image.width(), image.height(), image.rgb().to_vec())
        .ok_or_else(|| anyhow!("pixel buffer does not match image dimensions"))?;
    let transform = LetterboxTransform::new(image.width(), image.height(), size);
    let (scaled_w, scaled_h) = transform.scaled_dims();
    let resized = imageops::resize(&source, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    imageops::replace(
        &mut canvas,
        &resized,
        transform.pad_x as i64,
        transform.pad_y as i64,
    );

    let side = size as usize;
    let plane = side * side;
    let mut tensor = vec![0f32; plane * 3];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let idx = y as usize * side + x as usize;
        for channel in 0..3 {
            tensor[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }
    Ok((tensor, transform))
}
