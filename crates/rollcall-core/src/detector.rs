//! Multi-pass face locator.
//!
//! Pass 1 runs the cascade with strict clustering, pass 2 re-runs it on a
//! bilateral-smoothed frame with looser settings, and pass 3 falls back to a
//! contour search. Later passes run only when earlier ones found nothing.
//! Survivors go through greedy area-ordered NMS and are padded by a margin.

use crate::cascade::{self, Cascade, IntegralImage, Rect, Sweep};
use crate::fallback::ContourSearch;
use crate::frame::{self, GrayFrame};
use crate::types::{FaceBox, FaceLocator};
use image::RgbImage;

/// Heuristic confidence reported for every detection.
pub const DETECTION_CONFIDENCE: f32 = 0.7;
const NMS_IOU_THRESHOLD: f32 = 0.3;
const BOX_MARGIN: f32 = 0.1;
const CLUSTER_EPS: f32 = 0.2;

/// Settings for one cascade pass.
#[derive(Debug, Clone, Copy)]
pub struct PassConfig {
    pub scale_factor: f32,
    /// A cluster needs more than this many hits to survive.
    pub min_neighbors: usize,
    pub min_size: u32,
    pub max_size: u32,
    /// Pre-smooth with a bilateral filter before sweeping.
    pub smooth: bool,
}

/// Candidate acceptance: near-square and neither flat nor blown out.
#[derive(Debug, Clone, Copy)]
pub struct QualityFilter {
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub min_stddev: f32,
    pub max_stddev: f32,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self {
            min_aspect: 0.7,
            max_aspect: 1.3,
            min_stddev: 15.0,
            max_stddev: 70.0,
        }
    }
}

/// Immutable detector configuration. Build once and share; nothing in the
/// locator mutates it.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub strict: PassConfig,
    pub relaxed: PassConfig,
    pub quality: QualityFilter,
    pub fallback_enabled: bool,
    /// Window translation step as a fraction of the window side.
    pub step_fraction: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            strict: PassConfig {
                scale_factor: 1.1,
                min_neighbors: 3,
                min_size: 30,
                max_size: 600,
                smooth: false,
            },
            relaxed: PassConfig {
                scale_factor: 1.05,
                min_neighbors: 2,
                min_size: 20,
                max_size: 800,
                smooth: true,
            },
            quality: QualityFilter::default(),
            fallback_enabled: true,
            step_fraction: 0.1,
        }
    }
}

/// Cascade-based face locator.
#[derive(Debug, Clone, Default)]
pub struct CascadeDetector {
    config: DetectorConfig,
    cascade: Cascade,
    contours: ContourSearch,
}

impl CascadeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            cascade: Cascade::default(),
            contours: ContourSearch::default(),
        }
    }

    /// Locate faces in an intensity frame.
    pub fn detect_gray(&self, gray: &GrayFrame) -> Vec<FaceBox> {
        if gray.is_empty() {
            return Vec::new();
        }
        let integral = IntegralImage::new(gray);

        let mut candidates = self.run_pass("strict", &self.config.strict, gray, &integral);
        if candidates.is_empty() {
            candidates = self.run_pass("relaxed", &self.config.relaxed, gray, &integral);
        }
        if candidates.is_empty() && self.config.fallback_enabled {
            candidates = self.contours.find(gray).into_iter().collect();
            tracing::debug!(found = candidates.len(), "contour fallback finished");
        }

        let boxes: Vec<FaceBox> = candidates
            .into_iter()
            .map(|r| FaceBox::new(r.x as u32, r.y as u32, r.w as u32, r.h as u32, DETECTION_CONFIDENCE))
            .collect();

        suppress_overlaps(boxes, NMS_IOU_THRESHOLD)
            .into_iter()
            .map(|b| b.expanded(BOX_MARGIN, gray.width, gray.height))
            .collect()
    }

    fn run_pass(&self, name: &str, pass: &PassConfig, gray: &GrayFrame, integral: &IntegralImage) -> Vec<Rect> {
        let sweep = Sweep {
            scale_factor: pass.scale_factor,
            min_size: pass.min_size,
            max_size: pass.max_size,
            step_fraction: self.config.step_fraction,
        };

        let hits = if pass.smooth {
            let smoothed = frame::bilateral_filter(gray, 3, 30.0, 3.0);
            cascade::sweep(&IntegralImage::new(&smoothed), &self.cascade, &sweep)
        } else {
            cascade::sweep(integral, &self.cascade, &sweep)
        };

        let grouped = cascade::group_hits(&hits, pass.min_neighbors, CLUSTER_EPS);
        // Quality is judged on the unsmoothed frame.
        let kept: Vec<Rect> = grouped
            .into_iter()
            .filter(|r| self.passes_quality(r, integral))
            .collect();

        tracing::debug!(pass = name, hits = hits.len(), kept = kept.len(), "cascade pass finished");
        kept
    }

    fn passes_quality(&self, r: &Rect, integral: &IntegralImage) -> bool {
        let q = &self.config.quality;
        let aspect = r.w as f32 / r.h.max(1) as f32;
        let sd = integral.rect_stddev(r);
        (q.min_aspect..=q.max_aspect).contains(&aspect) && (q.min_stddev..=q.max_stddev).contains(&sd)
    }
}

impl FaceLocator for CascadeDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceBox> {
        let faces = self.detect_gray(&GrayFrame::from_rgb(image));
        tracing::debug!(faces = faces.len(), "detection complete");
        faces
    }
}

/// Greedy non-maximum suppression ordered by area: a box is kept only if its
/// IoU with every previously kept box is below `iou_threshold`.
pub fn suppress_overlaps(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    if boxes.len() <= 1 {
        return boxes;
    }
    boxes.sort_by(|a, b| b.area().cmp(&a.area()));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|k| k.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
