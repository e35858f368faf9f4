//! Last-resort contour search, used only when both cascade passes come up
//! empty. Returns at most one candidate and never guesses a region when
//! nothing qualifies.

use crate::cascade::Rect;
use crate::frame::GrayFrame;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ContourSearch {
    /// Sobel magnitude at or above which a pixel counts as an edge.
    pub edge_threshold: f32,
    pub min_side: usize,
    pub min_area: usize,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl Default for ContourSearch {
    fn default() -> Self {
        Self {
            edge_threshold: 120.0,
            min_side: 40,
            min_area: 1600,
            min_aspect: 0.75,
            max_aspect: 1.25,
        }
    }
}

/// Binary edge map from the Sobel gradient magnitude. Border pixels are never edges.
fn edge_map(frame: &GrayFrame, threshold: f32) -> Vec<bool> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let mut edges = vec![false; w * h];
    if w < 3 || h < 3 {
        return edges;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let p = |dx: usize, dy: usize| frame.get(x + dx - 1, y + dy - 1) as f32;
            let gx = (p(2, 0) + 2.0 * p(2, 1) + p(2, 2)) - (p(0, 0) + 2.0 * p(0, 1) + p(0, 2));
            let gy = (p(0, 2) + 2.0 * p(1, 2) + p(2, 2)) - (p(0, 0) + 2.0 * p(1, 0) + p(2, 0));
            edges[y * w + x] = (gx * gx + gy * gy).sqrt() >= threshold;
        }
    }
    edges
}

/// Bounding boxes of 8-connected edge components.
fn component_bounds(edges: &[bool], w: usize, h: usize) -> Vec<Rect> {
    let mut seen = vec![false; w * h];
    let mut stack = Vec::new();
    let mut bounds = Vec::new();

    for start in 0..w * h {
        if !edges[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        let (mut x0, mut y0) = (start % w, start / w);
        let (mut x1, mut y1) = (x0, y0);

        while let Some(idx) = stack.pop() {
            let (cx, cy) = (idx % w, idx / w);
            x0 = x0.min(cx);
            x1 = x1.max(cx);
            y0 = y0.min(cy);
            y1 = y1.max(cy);

            for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if edges[n] && !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        bounds.push(Rect { x: x0, y: y0, w: x1 - x0 + 1, h: y1 - y0 + 1 });
    }

    bounds
}

impl ContourSearch {
    fn qualifies(&self, r: &Rect) -> bool {
        let aspect = r.w as f32 / r.h as f32;
        r.w >= self.min_side
            && r.h >= self.min_side
            && r.w * r.h >= self.min_area
            && (self.min_aspect..=self.max_aspect).contains(&aspect)
    }

    /// Largest face-shaped edge component, if any.
    pub fn find(&self, frame: &GrayFrame) -> Option<Rect> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if w == 0 || h == 0 {
            return None;
        }
        let edges = edge_map(frame, self.edge_threshold);
        component_bounds(&edges, w, h)
            .into_iter()
            .filter(|r| self.qualifies(r))
            .max_by_key(|r| r.w * r.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_rect(w: usize, h: usize, r: Rect, fill: u8, bg: u8) -> GrayFrame {
        let mut data = vec![bg; w * h];
        for y in r.y..r.y + r.h {
            for x in r.x..r.x + r.w {
                data[y * w + x] = fill;
            }
        }
        GrayFrame::new(data, w as u32, h as u32)
    }

    #[test]
    fn test_flat_frame_yields_nothing() {
        let frame = GrayFrame::new(vec![120; 200 * 200], 200, 200);
        assert!(ContourSearch::default().find(&frame).is_none());
    }

    #[test]
    fn test_square_blob_found() {
        let blob = Rect { x: 50, y: 40, w: 80, h: 90 };
        let frame = frame_with_rect(200, 200, blob, 200, 60);
        let found = ContourSearch::default().find(&frame).unwrap();
        // The edge band straddles the blob border by one pixel.
        assert!((found.x as i32 - 50).abs() <= 1);
        assert!((found.y as i32 - 40).abs() <= 1);
        assert!((found.w as i32 - 80).abs() <= 2);
        assert!((found.h as i32 - 90).abs() <= 2);
    }

    #[test]
    fn test_elongated_blob_rejected() {
        let blob = Rect { x: 20, y: 80, w: 160, h: 50 };
        let frame = frame_with_rect(200, 200, blob, 200, 60);
        assert!(ContourSearch::default().find(&frame).is_none());
    }

    #[test]
    fn test_small_blob_rejected() {
        let blob = Rect { x: 20, y: 20, w: 30, h: 30 };
        let frame = frame_with_rect(200, 200, blob, 200, 60);
        assert!(ContourSearch::default().find(&frame).is_none());
    }

    #[test]
    fn test_largest_candidate_wins() {
        let mut frame = frame_with_rect(300, 200, Rect { x: 10, y: 10, w: 60, h: 60 }, 200, 60);
        let big = Rect { x: 120, y: 30, w: 120, h: 120 };
        for y in big.y..big.y + big.h {
            for x in big.x..big.x + big.w {
                frame.data[y * 300 + x] = 220;
            }
        }
        let found = ContourSearch::default().find(&frame).unwrap();
        assert!(found.x >= 118 && found.w >= 118);
    }
}
