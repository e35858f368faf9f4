//! Hand-crafted face descriptor.
//!
//! A face crop is cleaned up (reflection suppression, CLAHE), resized to a
//! canonical 32×32 square and summarised three ways: raw intensities, a local
//! binary pattern histogram and a gradient magnitude histogram. The
//! concatenation is L2-normalized.

use crate::frame::{self, GrayFrame};
use crate::types::{Descriptor, FaceBox, FeatureExtractor};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{s, Array2};

pub const CANONICAL_SIZE: usize = 32;
pub const LBP_BINS: usize = 256;
pub const GRADIENT_BINS: usize = 16;
pub const DESCRIPTOR_LEN: usize = CANONICAL_SIZE * CANONICAL_SIZE + LBP_BINS + GRADIENT_BINS;
pub const DESCRIPTOR_VERSION: &str = "lbp-grad-v1";

/// Pixels at or above this value count as specular highlights.
const OVEREXPOSED: u8 = 240;
const HIGHLIGHT_RADIUS: usize = 3;
const CLAHE_TILES: u32 = 4;
const CLAHE_CLIP: f32 = 0.04;
const NORM_EPSILON: f32 = 1e-7;
/// Largest Sobel magnitude on a [0, 1] image: |gx|, |gy| ≤ 4.
const MAX_GRADIENT: f32 = 5.656_854;

/// Intensity + texture + gradient descriptor extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureExtractor;

impl TextureExtractor {
    /// Crop the (clamped) box out of the raster as intensity. `None` if the
    /// clamped crop is empty.
    fn crop(image: &RgbImage, face: &FaceBox) -> Option<GrayFrame> {
        let (w, h) = image.dimensions();
        let x0 = face.x.min(w);
        let y0 = face.y.min(h);
        let x1 = face.x.saturating_add(face.width).min(w);
        let y1 = face.y.saturating_add(face.height).min(h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let crop = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
        Some(GrayFrame::from_rgb(&crop))
    }

    /// Build the descriptor from an intensity crop.
    pub fn describe(&self, mut face: GrayFrame) -> Option<Descriptor> {
        if face.is_empty() {
            return None;
        }
        suppress_reflections(&mut face);
        frame::clahe_enhance(&mut face, CLAHE_TILES, CLAHE_CLIP);

        let resized = image::imageops::resize(
            &face.into_gray_image()?,
            CANONICAL_SIZE as u32,
            CANONICAL_SIZE as u32,
            FilterType::Triangle,
        );
        let canonical = Array2::from_shape_fn((CANONICAL_SIZE, CANONICAL_SIZE), |(y, x)| {
            resized.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
        });

        let mut values = Vec::with_capacity(DESCRIPTOR_LEN);
        values.extend(canonical.iter().copied());
        values.extend(lbp_histogram(&canonical));
        values.extend(gradient_histogram(&canonical));

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        for v in values.iter_mut() {
            *v /= norm + NORM_EPSILON;
        }

        if values.len() != DESCRIPTOR_LEN || values.iter().any(|v| !v.is_finite()) {
            tracing::warn!(len = values.len(), "descriptor extraction produced an invalid vector");
            return None;
        }
        Some(Descriptor::new(values, DESCRIPTOR_VERSION))
    }
}

impl FeatureExtractor for TextureExtractor {
    fn extract(&self, image: &RgbImage, face: &FaceBox) -> Option<Descriptor> {
        let crop = Self::crop(image, face)?;
        self.describe(crop)
    }

    fn version(&self) -> &str {
        DESCRIPTOR_VERSION
    }
}

fn morph3x3(src: &GrayFrame, pick: fn(u8, u8) -> u8) -> GrayFrame {
    let w = src.width as usize;
    let h = src.height as usize;
    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = src.get(x, y);
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    acc = pick(acc, src.get(nx, ny));
                }
            }
            out[y * w + x] = acc;
        }
    }
    GrayFrame::new(out, src.width, src.height)
}

/// Morphological closing (3×3 dilate then erode), then every overexposed
/// pixel is replaced by the mean of the non-overexposed pixels around it
/// (or of the whole neighbourhood when it is saturated everywhere).
pub fn suppress_reflections(face: &mut GrayFrame) {
    if face.is_empty() {
        return;
    }
    let closed = morph3x3(&morph3x3(face, u8::max), u8::min);
    let w = closed.width as usize;
    let h = closed.height as usize;

    let mut out = closed.data.clone();
    for y in 0..h {
        for x in 0..w {
            if closed.get(x, y) < OVEREXPOSED {
                continue;
            }
            let (mut sum, mut count, mut all_sum, mut all_count) = (0u32, 0u32, 0u32, 0u32);
            for ny in y.saturating_sub(HIGHLIGHT_RADIUS)..=(y + HIGHLIGHT_RADIUS).min(h - 1) {
                for nx in x.saturating_sub(HIGHLIGHT_RADIUS)..=(x + HIGHLIGHT_RADIUS).min(w - 1) {
                    let v = closed.get(nx, ny) as u32;
                    all_sum += v;
                    all_count += 1;
                    if v < OVEREXPOSED as u32 {
                        sum += v;
                        count += 1;
                    }
                }
            }
            out[y * w + x] = if count > 0 {
                (sum as f32 / count as f32).round() as u8
            } else {
                (all_sum as f32 / all_count as f32).round() as u8
            };
        }
    }
    face.data = out;
}

/// Histogram of 8-neighbour local binary pattern codes over interior pixels,
/// normalized to sum to 1.
pub fn lbp_histogram(img: &Array2<f32>) -> Vec<f32> {
    const OFFSETS: [(isize, isize); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, 1), (1, 1), (1, 0), (1, -1), (0, -1)];

    let mut hist = vec![0f32; LBP_BINS];
    let (rows, cols) = img.dim();
    if rows < 3 || cols < 3 {
        return hist;
    }
    for y in 1..rows - 1 {
        for x in 1..cols - 1 {
            let center = img[[y, x]];
            let mut code = 0usize;
            for (bit, (dy, dx)) in OFFSETS.iter().enumerate() {
                let n = img[[(y as isize + dy) as usize, (x as isize + dx) as usize]];
                if n >= center {
                    code |= 1 << bit;
                }
            }
            hist[code] += 1.0;
        }
    }
    normalize_sum(&mut hist);
    hist
}

/// Histogram of Sobel gradient magnitudes over interior pixels, normalized
/// to sum to 1.
pub fn gradient_histogram(img: &Array2<f32>) -> Vec<f32> {
    let mut hist = vec![0f32; GRADIENT_BINS];
    let (rows, cols) = img.dim();
    if rows < 3 || cols < 3 {
        return hist;
    }
    for y in 1..rows - 1 {
        for x in 1..cols - 1 {
            let win = img.slice(s![y - 1..=y + 1, x - 1..=x + 1]);
            let gx = (win[[0, 2]] + 2.0 * win[[1, 2]] + win[[2, 2]]) - (win[[0, 0]] + 2.0 * win[[1, 0]] + win[[2, 0]]);
            let gy = (win[[2, 0]] + 2.0 * win[[2, 1]] + win[[2, 2]]) - (win[[0, 0]] + 2.0 * win[[0, 1]] + win[[0, 2]]);
            let magnitude = (gx * gx + gy * gy).sqrt();
            let bin = ((magnitude / MAX_GRADIENT * GRADIENT_BINS as f32) as usize).min(GRADIENT_BINS - 1);
            hist[bin] += 1.0;
        }
    }
    normalize_sum(&mut hist);
    hist
}

fn normalize_sum(hist: &mut [f32]) {
    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        for v in hist.iter_mut() {
            *v /= total;
        }
    }
}
