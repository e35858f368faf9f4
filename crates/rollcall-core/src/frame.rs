//! Single-channel intensity frame and the filters shared by the locator and
//! the extractor: bilateral smoothing and CLAHE.

use image::{GrayImage, RgbImage};

/// Row-major 8-bit intensity buffer.
#[derive(Clone, Debug)]
pub struct GrayFrame {
    /// Intensity data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self { data, width, height }
    }

    /// Luma conversion of an RGB raster.
    pub fn from_rgb(image: &RgbImage) -> Self {
        let gray = image::imageops::grayscale(image);
        Self::from_gray_image(gray)
    }

    pub fn from_gray_image(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    pub fn into_gray_image(self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width as usize + x]
    }

    /// Mean and population standard deviation of all pixels.
    #[cfg(test)]
    pub(crate) fn mean_stddev(&self) -> (f32, f32) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.data.len() as f64;
        let mean = self.data.iter().map(|&b| b as f64).sum::<f64>() / n;
        let variance = self
            .data
            .iter()
            .map(|&b| (b as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        (mean as f32, variance.sqrt() as f32)
    }
}

/// Edge-preserving smoothing. Each output pixel is the average of its
/// `(2·radius+1)²` neighbourhood weighted by spatial distance and by
/// intensity difference, so steps larger than ~2·`sigma_color` survive.
pub fn bilateral_filter(frame: &GrayFrame, radius: usize, sigma_color: f32, sigma_space: f32) -> GrayFrame {
    let w = frame.width as usize;
    let h = frame.height as usize;
    if w == 0 || h == 0 {
        return frame.clone();
    }

    let side = 2 * radius + 1;
    let mut spatial = vec![0f32; side * side];
    for dy in 0..side {
        for dx in 0..side {
            let ry = dy as f32 - radius as f32;
            let rx = dx as f32 - radius as f32;
            spatial[dy * side + dx] = (-(rx * rx + ry * ry) / (2.0 * sigma_space * sigma_space)).exp();
        }
    }
    let mut range = [0f32; 256];
    for (d, weight) in range.iter_mut().enumerate() {
        let d = d as f32;
        *weight = (-(d * d) / (2.0 * sigma_color * sigma_color)).exp();
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let center = frame.get(x, y);
            let mut acc = 0f32;
            let mut norm = 0f32;
            for dy in 0..side {
                let yy = (y + dy).saturating_sub(radius).min(h - 1);
                for dx in 0..side {
                    let xx = (x + dx).saturating_sub(radius).min(w - 1);
                    let v = frame.get(xx, yy);
                    let weight = spatial[dy * side + dx] * range[v.abs_diff(center) as usize];
                    acc += weight * v as f32;
                    norm += weight;
                }
            }
            out[y * w + x] = (acc / norm).round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayFrame::new(out, frame.width, frame.height)
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in-place.
///
/// Divides the image into a `tiles` × `tiles` grid, computes a clipped
/// histogram per tile, builds CDFs, and uses bilinear interpolation between
/// tile CDFs for smooth output. Frames too small for the grid are left as is.
pub fn clahe_enhance(frame: &mut GrayFrame, tiles: u32, clip_limit: f32) {
    let w = frame.width as usize;
    let h = frame.height as usize;
    if w == 0 || h == 0 || tiles == 0 {
        return;
    }

    let t = tiles as usize;
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let gray = &mut frame.data;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);

    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            let y0 = row * tile_h;
            let x0 = col * tile_w;

            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            // Clip and redistribute the excess evenly
            let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = (tile_pixels as f32) - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = gray[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (t - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (t - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(t - 1);
            let c1 = (c0 + 1).min(t - 1);

            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let tl = cdfs[r0 * t + c0][pixel];
            let tr = cdfs[r0 * t + c1][pixel];
            let bl = cdfs[r1 * t + c0][pixel];
            let br = cdfs[r1 * t + c1][pixel];

            let top = tl * (1.0 - dx) + tr * dx;
            let bot = bl * (1.0 - dx) + br * dx;
            let val = top * (1.0 - dy) + bot * dy;

            gray[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}
