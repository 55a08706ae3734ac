//! Candidate selection and crop-region geometry.

use crate::types::FaceBox;

/// Default weight of the off-center penalty in [`candidate_score`].
pub const DEFAULT_CENTRALITY_PENALTY: f64 = 0.3;

/// Score a candidate by area, penalized by its distance from the frame center.
///
/// Distance is normalized per axis by half the frame dimension, so a
/// centered box scores its full area and the penalty grows in proportion to
/// the area itself.
pub fn candidate_score(face: &FaceBox, frame_width: u32, frame_height: u32, penalty: f64) -> f64 {
    let area = face.area() as f64;
    let (cx, cy) = face.center();
    let half_w = frame_width as f64 / 2.0;
    let half_h = frame_height as f64 / 2.0;
    let dist = ((cx - half_w) / half_w).hypot((cy - half_h) / half_h);
    area - penalty * dist * area
}

/// Pick the highest-scoring candidate. On equal scores the earliest wins.
pub fn select_candidate(
    candidates: &[FaceBox],
    frame_width: u32,
    frame_height: u32,
    penalty: f64,
) -> Option<FaceBox> {
    candidates
        .iter()
        .map(|c| (c, candidate_score(c, frame_width, frame_height, penalty)))
        .fold(None, |best: Option<(&FaceBox, f64)>, (c, s)| match best {
            Some((_, bs)) if bs >= s => best,
            _ => Some((c, s)),
        })
        .map(|(c, _)| *c)
}

/// Map a box found at working resolution back to the original frame.
/// `scale` is the forward factor that produced the working copy.
pub fn map_to_original(face: &FaceBox, scale: f64) -> FaceBox {
    if scale == 1.0 {
        return *face;
    }
    let inv = 1.0 / scale;
    let map = |v: u32| (v as f64 * inv).round() as u32;
    FaceBox::new(map(face.x), map(face.y), map(face.width), map(face.height))
}

/// Half-open crop rectangle `[x0, x1) × [y0, y1)` inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl CropRegion {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Pad a face box by `margin_rel × max(w, h)` on every side, then grow the
/// shorter axis toward a square. Every edge is clamped to the frame
/// independently, so a crop pinned against a border may stay non-square.
///
/// Returns `None` if the region collapses to zero area.
pub fn crop_region(face: &FaceBox, margin_rel: f64, frame_width: u32, frame_height: u32) -> Option<CropRegion> {
    let (fw, fh) = (frame_width as i64, frame_height as i64);
    let pad = (face.width.max(face.height) as f64 * margin_rel.max(0.0)).round() as i64;

    let mut x0 = (face.x as i64 - pad).max(0);
    let mut y0 = (face.y as i64 - pad).max(0);
    let mut x1 = (face.right() as i64 + pad).min(fw);
    let mut y1 = (face.bottom() as i64 + pad).min(fh);

    let (crop_w, crop_h) = (x1 - x0, y1 - y0);
    if crop_w < crop_h {
        let diff = crop_h - crop_w;
        x0 = (x0 - diff / 2).max(0);
        x1 = (x1 + (diff + 1) / 2).min(fw);
    } else if crop_h < crop_w {
        let diff = crop_w - crop_h;
        y0 = (y0 - diff / 2).max(0);
        y1 = (y1 + (diff + 1) / 2).min(fh);
    }

    let region = CropRegion {
        x0: x0.clamp(0, fw) as u32,
        y0: y0.clamp(0, fh) as u32,
        x1: x1.clamp(0, fw) as u32,
        y1: y1.clamp(0, fh) as u32,
    };
    (!region.is_degenerate()).then_some(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_beats_offset_at_equal_area() {
        let centered = FaceBox::new(270, 190, 100, 100);
        let offset = FaceBox::new(20, 20, 100, 100);
        let picked = select_candidate(&[offset, centered], 640, 480, DEFAULT_CENTRALITY_PENALTY);
        assert_eq!(picked, Some(centered));

        let picked = select_candidate(&[centered, offset], 640, 480, DEFAULT_CENTRALITY_PENALTY);
        assert_eq!(picked, Some(centered));
    }

    #[test]
    fn test_dead_center_scores_full_area() {
        let b = FaceBox::new(270, 190, 100, 100);
        assert_eq!(candidate_score(&b, 640, 480, 0.3), 10_000.0);
    }

    #[test]
    fn test_large_off_center_can_beat_small_centered() {
        let small_center = FaceBox::new(300, 220, 40, 40);
        let big_corner = FaceBox::new(0, 0, 200, 200);
        let picked = select_candidate(&[small_center, big_corner], 640, 480, 0.3);
        assert_eq!(picked, Some(big_corner));
    }

    #[test]
    fn test_tie_keeps_first() {
        // Mirror images around the center score identically
        let left = FaceBox::new(100, 190, 100, 100);
        let right = FaceBox::new(440, 190, 100, 100);
        assert_eq!(select_candidate(&[left, right], 640, 480, 0.3), Some(left));
        assert_eq!(select_candidate(&[right, left], 640, 480, 0.3), Some(right));
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(select_candidate(&[], 640, 480, 0.3), None);
    }

    #[test]
    fn test_map_to_original() {
        let b = FaceBox::new(10, 20, 30, 41);
        assert_eq!(map_to_original(&b, 1.0), b);
        assert_eq!(map_to_original(&b, 0.5), FaceBox::new(20, 40, 60, 82));
        // 1/0.48 ≈ 2.0833
        assert_eq!(map_to_original(&FaceBox::new(3, 3, 3, 3), 0.48), FaceBox::new(6, 6, 6, 6));
    }

    #[test]
    fn test_crop_region_margin() {
        let face = FaceBox::new(100, 100, 80, 80);
        let r = crop_region(&face, 0.25, 640, 480).unwrap();
        assert_eq!(r, CropRegion { x0: 80, y0: 80, x1: 200, y1: 200 });
    }

    #[test]
    fn test_crop_region_squares_with_odd_pixel_trailing() {
        // 40x45 box, no margin: widen by 5 → 2 left, 3 right
        let face = FaceBox::new(100, 100, 40, 45);
        let r = crop_region(&face, 0.0, 640, 480).unwrap();
        assert_eq!(r, CropRegion { x0: 98, y0: 100, x1: 143, y1: 145 });
        assert_eq!(r.width(), r.height());
    }

    #[test]
    fn test_crop_region_clamped_at_border() {
        let face = FaceBox::new(0, 0, 50, 50);
        let r = crop_region(&face, 0.25, 640, 480).unwrap();
        // pad 13 only extends right/bottom
        assert_eq!(r, CropRegion { x0: 0, y0: 0, x1: 63, y1: 63 });
    }

    #[test]
    fn test_crop_region_square_pinned_by_frame() {
        // Wide box in a short frame: height cannot grow past the frame
        let face = FaceBox::new(10, 0, 60, 20);
        let r = crop_region(&face, 0.0, 100, 20).unwrap();
        assert_eq!((r.width(), r.height()), (60, 20));
    }

    #[test]
    fn test_crop_region_degenerate() {
        let face = FaceBox::new(50, 50, 0, 0);
        assert!(crop_region(&face, 0.25, 640, 480).is_none());
        let outside = FaceBox::new(700, 500, 10, 10);
        assert!(crop_region(&outside, 0.0, 640, 480).is_none());
    }
}
