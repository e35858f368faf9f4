//! Image decoding and size bounding.

use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

/// Rasters wider than this are downscaled before detection.
pub const MAX_RASTER_WIDTH: u32 = 800;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("invalid image: decoded raster is empty")]
    EmptyImage,
}

/// Decode raw bytes into an RGB raster no wider than [`MAX_RASTER_WIDTH`].
pub fn decode(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let decoded = image::load_from_memory(bytes)?.to_rgb8();
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(PreprocessError::EmptyImage);
    }
    Ok(bound_width(decoded, MAX_RASTER_WIDTH))
}

/// Uniformly downscale so the width is at most `max_width`, preserving aspect ratio.
pub fn bound_width(image: RgbImage, max_width: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width <= max_width {
        return image;
    }
    let scale = max_width as f32 / width as f32;
    let new_height = ((height as f32 * scale).round() as u32).max(1);

    tracing::debug!(width, height, new_width = max_width, new_height, "downscaling raster");
    image::imageops::resize(&image, max_width, new_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([10, 120, 200]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_small_png_unchanged() {
        let raster = decode(&png_bytes(320, 240)).unwrap();
        assert_eq!(raster.dimensions(), (320, 240));
        assert_eq!(raster.get_pixel(5, 5), &Rgb([10, 120, 200]));
    }

    #[test]
    fn test_decode_wide_png_downscaled() {
        let raster = decode(&png_bytes(1600, 900)).unwrap();
        assert_eq!(raster.dimensions(), (800, 450));
    }

    #[test]
    fn test_exactly_max_width_untouched() {
        let raster = decode(&png_bytes(800, 601)).unwrap();
        assert_eq!(raster.dimensions(), (800, 601));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidImage(_)));
    }

    #[test]
    fn test_truncated_png_rejected() {
        let bytes = png_bytes(64, 64);
        assert!(decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_bound_width_keeps_min_height() {
        let thin = RgbImage::from_pixel(4000, 1, Rgb([0, 0, 0]));
        assert_eq!(bound_width(thin, 800).dimensions(), (800, 1));
    }
}
