use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A detected face region in raster coordinates.
///
/// `confidence` is a fixed heuristic, not a calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> Self {
        Self { x, y, width, height, confidence }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width over height; 0.0 for a degenerate box.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = x2.saturating_sub(x1) as u64 * y2.saturating_sub(y1) as u64;
        let union = self.area() + other.area() - inter;

        if union > 0 {
            inter as f32 / union as f32
        } else {
            0.0
        }
    }

    /// Grow the box by `fraction` of its width/height on every side, clamped
    /// to a `bound_w` × `bound_h` raster.
    pub fn expanded(&self, fraction: f32, bound_w: u32, bound_h: u32) -> FaceBox {
        let margin_x = (self.width as f32 * fraction) as u32;
        let margin_y = (self.height as f32 * fraction) as u32;

        let x1 = self.x.saturating_sub(margin_x);
        let y1 = self.y.saturating_sub(margin_y);
        let x2 = (self.x + self.width + margin_x).min(bound_w);
        let y2 = (self.y + self.height + margin_y).min(bound_h);

        FaceBox {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
            confidence: self.confidence,
        }
    }
}

/// Fixed-length face descriptor.
///
/// The length is pinned by `version`; descriptors of differing length are
/// never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Extractor version that produced these values (e.g. "lbp-grad-v1").
    pub version: String,
}

impl Descriptor {
    pub fn new(values: Vec<f32>, version: impl Into<String>) -> Self {
        Self { values, version: version.into() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]; 0.0 when either vector has zero norm.
    pub fn cosine(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Pearson correlation in [-1, 1]; 0.0 when either vector is constant.
    pub fn pearson(&self, other: &Descriptor) -> f32 {
        let n = self.values.len().min(other.values.len());
        if n == 0 {
            return 0.0;
        }
        let mean_a = self.values[..n].iter().sum::<f32>() / n as f32;
        let mean_b = other.values[..n].iter().sum::<f32>() / n as f32;

        let mut cov = 0.0f32;
        let mut var_a = 0.0f32;
        let mut var_b = 0.0f32;
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            let da = a - mean_a;
            let db = b - mean_b;
            cov += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denom = (var_a * var_b).sqrt();
        if denom > 0.0 { cov / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Weighted blend used for gallery matching:
    /// `0.5·|cosine| + 0.3·|pearson| + 0.2·1/(1 + euclidean)`.
    ///
    /// Returns `None` when the lengths differ.
    pub fn similarity(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let cosine = self.cosine(other).abs();
        let pearson = self.pearson(other).abs();
        let proximity = 1.0 / (1.0 + self.euclidean_distance(other));
        Some(COSINE_WEIGHT * cosine + PEARSON_WEIGHT * pearson + PROXIMITY_WEIGHT * proximity)
    }

    /// Raw little-endian f32 bytes, as persisted. The version travels separately.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Rebuild from persisted bytes; `None` when the byte count is not a
    /// whole number of f32 values.
    pub fn from_bytes(bytes: &[u8], version: impl Into<String>) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self::new(values, version))
    }
}

const COSINE_WEIGHT: f32 = 0.5;
const PEARSON_WEIGHT: f32 = 0.3;
const PROXIMITY_WEIGHT: f32 = 0.2;

/// One enrolled descriptor available for matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub label: String,
    pub descriptor: Descriptor,
}

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Blended similarity of the best comparable entry (0.0 if none).
    pub similarity: f32,
    pub identity_id: Option<String>,
    pub label: Option<String>,
}

impl MatchResult {
    fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            identity_id: None,
            label: None,
        }
    }
}

/// Finds candidate face regions in a raster.
pub trait FaceLocator {
    fn detect(&self, image: &RgbImage) -> Vec<FaceBox>;
}

/// Turns one face region into a descriptor; `None` on any failure.
pub trait FeatureExtractor {
    fn extract(&self, image: &RgbImage, face: &FaceBox) -> Option<Descriptor>;

    /// Version tag stamped on every descriptor this extractor produces.
    fn version(&self) -> &str;
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Weighted cosine/correlation/distance matcher.
///
/// Each face is matched on its own; two faces in one image may resolve to
/// the same identity.
pub struct BlendedMatcher;

impl Matcher for BlendedMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let Some(sim) = probe.similarity(&entry.descriptor) else {
                tracing::trace!(
                    identity = %entry.identity_id,
                    probe_len = probe.len(),
                    entry_len = entry.descriptor.len(),
                    "skipping gallery entry with mismatched descriptor length"
                );
                continue;
            };
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                identity_id: Some(gallery[idx].identity_id.clone()),
                label: Some(gallery[idx].label.clone()),
            },
            Some(_) => MatchResult::no_match(best_sim),
            None => MatchResult::no_match(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec(), "test")
    }

    fn entry(id: &str, values: &[f32]) -> GalleryEntry {
        GalleryEntry {
            identity_id: id.into(),
            label: format!("label-{id}"),
            descriptor: desc(values),
        }
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let a = desc(&[0.2, 0.4, 0.1, 0.9]);
        let sim = a.similarity(&a).unwrap();
        assert!((sim - 1.0).abs() < 1e-5, "got {sim}");
    }

    #[test]
    fn test_similarity_blend_weights() {
        let d = desc(&[0.5, 0.5, 0.5, 0.5, 0.0]);
        let q = desc(&[0.35, 1.0, 0.8, 0.9, 0.1]);
        let expected = 0.5 * d.cosine(&q).abs()
            + 0.3 * d.pearson(&q).abs()
            + 0.2 / (1.0 + d.euclidean_distance(&q));
        let sim = d.similarity(&q).unwrap();
        assert!((sim - expected).abs() < 1e-6);
        assert!((sim - 0.82).abs() < 1e-3, "got {sim}");
    }

    #[test]
    fn test_similarity_uses_absolute_correlation() {
        let a = desc(&[1.0, 0.0]);
        let b = desc(&[-1.0, 0.0]);
        // |cos| = 1, |pearson| = 1, distance = 2
        let expected = 0.5 + 0.3 + 0.2 / 3.0;
        assert!((a.similarity(&b).unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_length_mismatch() {
        let a = desc(&[1.0, 0.0]);
        let b = desc(&[1.0, 0.0, 0.0]);
        assert!(a.similarity(&b).is_none());
    }

    #[test]
    fn test_pearson_constant_vector() {
        let a = desc(&[0.5, 0.5, 0.5]);
        let b = desc(&[0.1, 0.7, 0.3]);
        assert_eq!(a.pearson(&b), 0.0);
    }

    #[test]
    fn test_similarity_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let a: Vec<f32> = (0..1296).map(|_| rng.gen()).collect();
        let b: Vec<f32> = (0..1296).map(|_| rng.gen()).collect();
        let (a, b) = (desc(&a), desc(&b));
        let first = a.similarity(&b).unwrap();
        for _ in 0..10 {
            assert_eq!(a.similarity(&b).unwrap().to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_bytes_roundtrip_and_rejects_ragged() {
        let a = desc(&[0.25, -1.5, 3.0]);
        let bytes = a.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Descriptor::from_bytes(&bytes, "test").unwrap(), a);
        assert!(Descriptor::from_bytes(&bytes[..11], "test").is_none());
    }

    #[test]
    fn test_matcher_picks_best_entry() {
        let probe = desc(&[0.5, 0.5, 0.5, 0.5, 0.0]);
        let gallery = vec![
            entry("decoy", &[0.0, 0.0, 0.0, 0.0, 1.0]),
            entry("a", &[0.35, 1.0, 0.8, 0.9, 0.1]),
        ];
        let result = BlendedMatcher.compare(&probe, &gallery, 0.7);
        assert!(result.matched);
        assert_eq!(result.identity_id.as_deref(), Some("a"));
        assert_eq!(result.label.as_deref(), Some("label-a"));
        assert!((result.similarity - 0.82).abs() < 1e-3);
    }

    #[test]
    fn test_matcher_below_threshold() {
        let probe = desc(&[0.5, 0.5, 0.5, 0.5, 0.0]);
        let gallery = vec![entry("a", &[0.35, 1.0, 0.8, 0.9, 0.1])];
        let result = BlendedMatcher.compare(&probe, &gallery, 0.9);
        assert!(!result.matched);
        assert!(result.identity_id.is_none());
        assert!((result.similarity - 0.82).abs() < 1e-3);
    }

    #[test]
    fn test_matcher_skips_mismatched_lengths() {
        let probe = desc(&[1.0, 0.0, 0.0]);
        let gallery = vec![entry("short", &[1.0, 0.0]), entry("long", &[1.0, 0.0, 0.0, 0.0])];
        let result = BlendedMatcher.compare(&probe, &gallery, 0.0);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = desc(&[1.0, 0.0]);
        let result = BlendedMatcher.compare(&probe, &[], 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_matcher_threshold_monotonic() {
        let mut rng = StdRng::seed_from_u64(42);
        let gallery: Vec<GalleryEntry> = (0..20)
            .map(|i| {
                let v: Vec<f32> = (0..64).map(|_| rng.gen_range(-1.0..1.0)).collect();
                entry(&i.to_string(), &v)
            })
            .collect();

        for _ in 0..20 {
            let q: Vec<f32> = (0..64).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let probe = desc(&q);
            let thresholds = [0.0f32, 0.2, 0.4, 0.5, 0.6, 0.7, 0.8, 1.0];
            for pair in thresholds.windows(2) {
                let low = BlendedMatcher.compare(&probe, &gallery, pair[0]);
                let high = BlendedMatcher.compare(&probe, &gallery, pair[1]);
                if high.matched {
                    assert!(low.matched);
                    assert_eq!(low.identity_id, high.identity_id);
                }
            }
        }
    }

    #[test]
    fn test_matcher_independent_per_probe() {
        // Two probes may both resolve to the same identity.
        let gallery = vec![entry("a", &[1.0, 0.0, 0.0]), entry("b", &[0.0, 0.0, 1.0])];
        let p1 = desc(&[1.0, 0.05, 0.0]);
        let p2 = desc(&[0.98, 0.0, 0.02]);
        let r1 = BlendedMatcher.compare(&p1, &gallery, 0.7);
        let r2 = BlendedMatcher.compare(&p2, &gallery, 0.7);
        assert_eq!(r1.identity_id.as_deref(), Some("a"));
        assert_eq!(r2.identity_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = FaceBox::new(0, 0, 100, 100, 0.7);
        let b = FaceBox::new(200, 200, 10, 10, 0.7);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial() {
        let a = FaceBox::new(0, 0, 10, 10, 0.7);
        let b = FaceBox::new(5, 0, 10, 10, 0.7);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_expanded_clamps_to_bounds() {
        let b = FaceBox::new(5, 50, 100, 100, 0.7);
        let e = b.expanded(0.1, 150, 155);
        assert_eq!((e.x, e.y), (0, 40));
        assert_eq!(e.width, 115);
        assert_eq!(e.height, 115);
    }
}
