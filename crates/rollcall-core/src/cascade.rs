//! Sliding-window cascade over an integral image.
//!
//! Every window runs a short sequence of cheap region-mean comparisons.
//! Regions are expressed as fractions of the window side so the same stages
//! apply at every scale. A window is a hit only if it clears every stage;
//! hits are then clustered and weak clusters discarded.

use crate::frame::GrayFrame;

/// Rectangle in pixel coordinates (exclusive right/bottom edges).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

/// Summed-area tables for O(1) region mean and variance.
pub(crate) struct IntegralImage {
    width: usize,
    height: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(frame: &GrayFrame) -> Self {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sq_sum = vec![0u64; stride * (height + 1)];

        for y in 0..height {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let v = frame.get(x, y) as u64;
                row += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        Self { width, height, sum, sq_sum }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn area_sum(&self, table: &[u64], x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let stride = self.width + 1;
        let tl = table[y0 * stride + x0];
        let tr = table[y0 * stride + x1];
        let bl = table[y1 * stride + x0];
        let br = table[y1 * stride + x1];
        (br + tl) - (tr + bl)
    }

    /// Mean intensity of `[x0, x1) × [y0, y1)`.
    pub fn mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f32 {
        let n = (x1 - x0) * (y1 - y0);
        if n == 0 {
            return 0.0;
        }
        (self.area_sum(&self.sum, x0, y0, x1, y1) as f64 / n as f64) as f32
    }

    /// Population standard deviation of `[x0, x1) × [y0, y1)`.
    pub fn stddev(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f32 {
        let n = (x1 - x0) * (y1 - y0);
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        let mean = self.area_sum(&self.sum, x0, y0, x1, y1) as f64 / n;
        let sq_mean = self.area_sum(&self.sq_sum, x0, y0, x1, y1) as f64 / n;
        (sq_mean - mean * mean).max(0.0).sqrt() as f32
    }

    pub fn rect_stddev(&self, r: &Rect) -> f32 {
        self.stddev(r.x, r.y, r.x + r.w, r.y + r.h)
    }
}

/// Window-relative region: (left, top, right, bottom) as fractions of the side.
type Region = (f32, f32, f32, f32);

const LEFT_EYE: Region = (0.15, 0.25, 0.45, 0.45);
const RIGHT_EYE: Region = (0.55, 0.25, 0.85, 0.45);
const LEFT_CHEEK: Region = (0.15, 0.5, 0.45, 0.7);
const RIGHT_CHEEK: Region = (0.55, 0.5, 0.85, 0.7);
const NOSE_BRIDGE: Region = (0.45, 0.25, 0.55, 0.45);
const FOREHEAD: Region = (0.2, 0.05, 0.8, 0.2);
const MOUTH: Region = (0.3, 0.72, 0.7, 0.85);
const UPPER_LIP: Region = (0.3, 0.58, 0.7, 0.7);

/// Stage thresholds, in units of the window's intensity std-dev.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cascade {
    pub min_window_stddev: f32,
    pub eye_contrast: f32,
    pub bridge_contrast: f32,
    pub mouth_contrast: f32,
}

impl Default for Cascade {
    fn default() -> Self {
        Self {
            min_window_stddev: 12.0,
            eye_contrast: 0.15,
            bridge_contrast: 0.15,
            mouth_contrast: 0.1,
        }
    }
}

impl Cascade {
    fn region_mean(ii: &IntegralImage, x: usize, y: usize, side: usize, r: Region) -> f32 {
        let s = side as f32;
        let x0 = x + (r.0 * s) as usize;
        let y0 = y + (r.1 * s) as usize;
        let x1 = (x + (r.2 * s) as usize).max(x0 + 1);
        let y1 = (y + (r.3 * s) as usize).max(y0 + 1);
        ii.mean(x0, y0, x1, y1)
    }

    /// Run every stage on the `side` × `side` window at (`x`, `y`).
    pub fn accepts(&self, ii: &IntegralImage, x: usize, y: usize, side: usize) -> bool {
        // Stage 1: reject flat windows
        let sd = ii.stddev(x, y, x + side, y + side);
        if sd < self.min_window_stddev {
            return false;
        }
        let mean = |r: Region| Self::region_mean(ii, x, y, side, r);

        // Stage 2: eyes darker than the cheeks below them
        let left_eye = mean(LEFT_EYE);
        let right_eye = mean(RIGHT_EYE);
        let eye_margin = self.eye_contrast * sd;
        if mean(LEFT_CHEEK) - left_eye < eye_margin || mean(RIGHT_CHEEK) - right_eye < eye_margin {
            return false;
        }

        // Stage 3: nose bridge and forehead brighter than both eyes
        let bridge_margin = self.bridge_contrast * sd;
        let bridge = mean(NOSE_BRIDGE);
        if bridge - left_eye < bridge_margin || bridge - right_eye < bridge_margin {
            return false;
        }
        let forehead = mean(FOREHEAD);
        if forehead - left_eye < bridge_margin || forehead - right_eye < bridge_margin {
            return false;
        }

        // Stage 4: mouth band darker than the band above it
        mean(UPPER_LIP) - mean(MOUTH) >= self.mouth_contrast * sd
    }
}

/// Window sweep parameters for one detection pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sweep {
    pub scale_factor: f32,
    pub min_size: u32,
    pub max_size: u32,
    /// Window translation step as a fraction of the window side.
    pub step_fraction: f32,
}

/// Slide square windows over the image at geometrically growing sizes and
/// collect every window the cascade accepts.
pub(crate) fn sweep(ii: &IntegralImage, cascade: &Cascade, params: &Sweep) -> Vec<Rect> {
    let (w, h) = (ii.width(), ii.height());
    let scale = params.scale_factor.max(1.01);
    let mut hits = Vec::new();
    let mut win = params.min_size.max(1) as f32;

    loop {
        let side = win.round() as usize;
        if side > params.max_size as usize || side > w || side > h {
            break;
        }
        let step = ((side as f32 * params.step_fraction).round() as usize).max(1);

        for y in (0..=h - side).step_by(step) {
            for x in (0..=w - side).step_by(step) {
                if cascade.accepts(ii, x, y, side) {
                    hits.push(Rect { x, y, w: side, h: side });
                }
            }
        }
        win *= scale;
    }

    hits
}

/// Two hits belong together when every edge differs by at most `eps` of
/// their mean size.
fn similar(a: &Rect, b: &Rect, eps: f32) -> bool {
    let delta = eps * (a.w.min(b.w) + a.h.min(b.h)) as f32 * 0.5;
    let close = |p: usize, q: usize| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.x + a.w, b.x + b.w) && close(a.y + a.h, b.y + b.h)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster raw hits and keep clusters with more than `min_neighbors`
/// members, each reduced to its average rectangle.
pub(crate) fn group_hits(hits: &[Rect], min_neighbors: usize, eps: f32) -> Vec<Rect> {
    let n = hits.len();
    let mut parent: Vec<usize> = (0..n).collect();

    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&hits[i], &hits[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut clusters: std::collections::BTreeMap<usize, Vec<&Rect>> = Default::default();
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(&hits[i]);
    }

    clusters
        .into_values()
        .filter(|members| members.len() > min_neighbors)
        .map(|members| {
            let count = members.len() as f32;
            let avg = |f: fn(&Rect) -> usize| {
                (members.iter().map(|r| f(r) as f32).sum::<f32>() / count).round() as usize
            };
            Rect {
                x: avg(|r| r.x),
                y: avg(|r| r.y),
                w: avg(|r| r.w),
                h: avg(|r| r.h),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from(data: Vec<u8>, w: u32, h: u32) -> GrayFrame {
        GrayFrame::new(data, w, h)
    }

    #[test]
    fn test_integral_mean_and_stddev() {
        // 4x2: top row 0, bottom row 100
        let frame = frame_from(vec![0, 0, 0, 0, 100, 100, 100, 100], 4, 2);
        let ii = IntegralImage::new(&frame);
        assert!((ii.mean(0, 0, 4, 2) - 50.0).abs() < 1e-4);
        assert!((ii.mean(0, 1, 4, 2) - 100.0).abs() < 1e-4);
        assert!((ii.stddev(0, 0, 4, 2) - 50.0).abs() < 1e-3);
        assert_eq!(ii.stddev(1, 1, 3, 2), 0.0);
    }

    #[test]
    fn test_flat_window_rejected() {
        let frame = frame_from(vec![128; 64 * 64], 64, 64);
        let ii = IntegralImage::new(&frame);
        assert!(!Cascade::default().accepts(&ii, 0, 0, 64));
    }

    #[test]
    fn test_sweep_flat_image_has_no_hits() {
        let frame = frame_from(vec![90; 120 * 120], 120, 120);
        let ii = IntegralImage::new(&frame);
        let params = Sweep { scale_factor: 1.1, min_size: 30, max_size: 600, step_fraction: 0.1 };
        assert!(sweep(&ii, &Cascade::default(), &params).is_empty());
    }

    #[test]
    fn test_group_hits_merges_and_thresholds() {
        let hits = vec![
            Rect { x: 10, y: 10, w: 50, h: 50 },
            Rect { x: 12, y: 11, w: 50, h: 50 },
            Rect { x: 9, y: 12, w: 52, h: 52 },
            Rect { x: 11, y: 10, w: 48, h: 48 },
            // isolated hit
            Rect { x: 200, y: 200, w: 50, h: 50 },
        ];
        let grouped = group_hits(&hits, 3, 0.2);
        assert_eq!(grouped.len(), 1);
        let r = grouped[0];
        assert!((r.x as i32 - 10).abs() <= 1 && (r.y as i32 - 11).abs() <= 1);
        assert_eq!(r.w, 50);

        assert!(group_hits(&hits, 4, 0.2).is_empty());
    }
}
