use rand::Rng;
use serde::{Deserialize, Serialize};

/// Horizontal half-extent of a synthetic box, in degrees of field of view
const SYNTHETIC_BOX_DEGREES: f64 = 3.0;

pub const DEFAULT_CONFIDENCE: f64 = 0.8;
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Corner-pair box with a confidence score, coordinates normalized to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub confidence: f64,
}

impl Bbox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64, confidence: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            confidence,
        }
    }

    pub fn from_xyxy(xyxy: [f64; 4], confidence: f64) -> Self {
        Self::new(xyxy[0], xyxy[1], xyxy[2], xyxy[3], confidence)
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.x_min, self.y_min, self.x_max, self.y_max, self.confidence]
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// Convert `[x_center, y_center, width, height]` rows to
/// `[x_min, y_min, x_max, y_max]`. Batched inputs are passed flattened.
pub fn xywh_to_xyxy(boxes: &[[f64; 4]]) -> Vec<[f64; 4]> {
    let mut out = boxes.to_vec();
    xywh_to_xyxy_in_place(&mut out);
    out
}

pub fn xywh_to_xyxy_in_place(boxes: &mut [[f64; 4]]) {
    for b in boxes.iter_mut() {
        let [cx, cy, w, h] = *b;
        *b = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
    }
}

/// Synthetic box around a detection azimuth, see [`generate_bbox_with_jitter_rng`].
pub fn generate_bbox_with_jitter(
    detection_azimuth: f64,
    cam_center_azimuth: f64,
    fov: f64,
    base_conf: f64,
    jitter_ratio: f64,
) -> Bbox {
    generate_bbox_with_jitter_rng(
        &mut rand::thread_rng(),
        detection_azimuth,
        cam_center_azimuth,
        fov,
        base_conf,
        jitter_ratio,
    )
}

/// Box centered on where `detection_azimuth` falls in the camera image.
///
/// The half-extent is `3 / fov` of the image width, perturbed by a uniform
/// draw in `[-jitter_ratio, jitter_ratio]` of itself and kept non-negative.
/// Both edges are clamped to [0, 1]. Downstream consumers read the box as
/// `(x0, x0, x1, x1, conf)`, so the y fields repeat the x edges.
pub fn generate_bbox_with_jitter_rng<R: Rng>(
    rng: &mut R,
    detection_azimuth: f64,
    cam_center_azimuth: f64,
    fov: f64,
    base_conf: f64,
    jitter_ratio: f64,
) -> Bbox {
    let center = 0.5 + (detection_azimuth - cam_center_azimuth) / fov;
    let half_extent = SYNTHETIC_BOX_DEGREES / fov;

    let jitter = half_extent * jitter_ratio * rng.gen_range(-1.0_f64..=1.0);
    let adjusted = (half_extent + jitter).max(0.0);

    let x0 = (center - adjusted).clamp(0.0, 1.0);
    let x1 = (center + adjusted).clamp(0.0, 1.0);

    Bbox::new(x0, x0, x1, x1, base_conf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_xywh_to_xyxy() {
        let boxes = [[0.5, 0.5, 0.2, 0.4], [0.1, 0.9, 0.0, 0.0], [0.3, 0.2, 1.0, 0.5]];
        let out = xywh_to_xyxy(&boxes);

        assert_eq!(out.len(), boxes.len());
        let expected = [0.4, 0.3, 0.6, 0.7];
        for (got, want) in out[0].iter().zip(expected.iter()) {
            assert!((got - want).abs() < EPS);
        }
        assert_eq!(out[1], [0.1, 0.9, 0.1, 0.9]);
        for row in &out {
            assert!(row[0] <= row[2]);
            assert!(row[1] <= row[3]);
        }
    }

    #[test]
    fn test_xywh_to_xyxy_empty() {
        assert!(xywh_to_xyxy(&[]).is_empty());
    }

    #[test]
    fn test_jitter_box_centered_without_jitter() {
        let mut rng = StdRng::seed_from_u64(7);
        let bbox = generate_bbox_with_jitter_rng(&mut rng, 100.0, 100.0, 60.0, 0.8, 0.0);

        assert!((bbox.x_min - (0.5 - 0.05)).abs() < EPS);
        assert!((bbox.x_max - (0.5 + 0.05)).abs() < EPS);
        assert_eq!(bbox.y_min, bbox.x_min);
        assert_eq!(bbox.y_max, bbox.x_max);
        assert_eq!(bbox.confidence, 0.8);
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let mut rng = StdRng::seed_from_u64(42);
        let half_extent = 3.0 / 54.2;
        for _ in 0..200 {
            let bbox = generate_bbox_with_jitter_rng(&mut rng, 10.0, 12.0, 54.2, 0.8, 0.1);
            let center = 0.5 + (10.0 - 12.0) / 54.2;
            let half = bbox.x_max - center;
            assert!(((bbox.x_min + bbox.x_max) / 2.0 - center).abs() < EPS);
            assert!(half >= half_extent * 0.9 - EPS);
            assert!(half <= half_extent * 1.1 + EPS);
        }
    }

    #[test]
    fn test_jitter_box_clamped_to_image() {
        let mut rng = StdRng::seed_from_u64(1);
        let bbox = generate_bbox_with_jitter_rng(&mut rng, 40.0, 10.0, 54.2, 0.5, 0.1);
        assert_eq!(bbox.x_max, 1.0);
        assert!(bbox.x_min <= 1.0);

        let bbox = generate_bbox_with_jitter_rng(&mut rng, -20.0, 10.0, 54.2, 0.5, 0.1);
        assert_eq!(bbox.x_min, 0.0);
        assert!(bbox.x_max >= 0.0);
    }

    #[test]
    fn test_large_negative_jitter_never_inverts() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let bbox = generate_bbox_with_jitter_rng(&mut rng, 0.0, 0.0, 60.0, 0.8, 5.0);
            assert!(bbox.x_min <= bbox.x_max);
        }
    }
}
