use crate::backend::RawDetection;
use ndarray::ArrayViewD;

/// Upper bound on detections kept per image after suppression.
pub const MAX_DETECTIONS: usize = 300;

/// Maps letterboxed model coordinates back onto the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            max_detections: MAX_DETECTIONS,
        }
    }

    /// Decode YOLO head output into detections on the original image.
    ///
    /// `output` is `[1, 4 + num_classes, num_anchors]`: rows 0..4 hold the box
    /// as centre-x, centre-y, width, height in letterboxed input pixels, the
    /// remaining rows hold per-class scores.
    #[tracing::instrument(skip(self, output, transform))]
    pub fn parse_detections(
        &self,
        output: &ArrayViewD<f32>,
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<RawDetection>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            anyhow::bail!(
                "Unexpected model output shape {:?}, expected [1, 4 + classes, anchors]",
                shape
            );
        }

        let num_classes = shape[1] - 4;
        let num_anchors = shape[2];

        let mut candidates = Vec::new();

        for i in 0..num_anchors {
            // Argmax over class scores
            let mut confidence = f32::NEG_INFINITY;
            let mut class_id = 0usize;
            for c in 0..num_classes {
                let score = output[[0, 4 + c, i]];
                if score > confidence {
                    confidence = score;
                    class_id = c;
                }
            }

            if confidence <= self.confidence_threshold {
                continue;
            }

            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            candidates.push(RawDetection {
                xyxy: cxcywh_to_xyxy(cx, cy, w, h),
                confidence,
                class_id,
            });
        }

        tracing::trace!(candidates = candidates.len(), "Candidates above threshold");

        let mut detections = non_maximum_suppression(candidates, self.iou_threshold);
        detections.truncate(self.max_detections);

        for det in &mut detections {
            det.xyxy = restore_coordinates(det.xyxy, transform);
        }

        Ok(detections)
    }
}

/// Greedy class-aware suppression: a box is dropped when it overlaps a
/// stronger box of the same class by more than `iou_threshold`.
/// Survivors are returned by descending confidence.
pub fn non_maximum_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection over union of two corner-format boxes
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union <= 0.0 { 0.0 } else { intersection / union }
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Inverse letterbox transform, clamped to the original image bounds
#[inline]
fn restore_coordinates(xyxy: [f32; 4], transform: &TransformParams) -> [f32; 4] {
    let max_x = transform.orig_width as f32;
    let max_y = transform.orig_height as f32;
    [
        ((xyxy[0] - transform.offset_x) / transform.scale).clamp(0.0, max_x),
        ((xyxy[1] - transform.offset_y) / transform.scale).clamp(0.0, max_y),
        ((xyxy[2] - transform.offset_x) / transform.scale).clamp(0.0, max_x),
        ((xyxy[3] - transform.offset_y) / transform.scale).clamp(0.0, max_y),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    /// Helper to create an identity TransformParams
    fn test_transform(orig_width: u32, orig_height: u32) -> TransformParams {
        TransformParams {
            orig_width,
            orig_height,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Helper to create YOLO format test data
    /// Creates an output array [1, 4 + num_classes, n] from per-anchor boxes
    /// and (class_idx, score) pairs; every other class score is 0.
    fn create_yolo_output(
        boxes_cxcywh: Vec<[f32; 4]>,
        class_scores: Vec<(usize, f32)>,
        num_classes: usize,
    ) -> Array<f32, IxDyn> {
        let n = boxes_cxcywh.len();
        let rows = 4 + num_classes;
        let mut output = Array::zeros(IxDyn(&[1, rows, n]));

        for (i, coords) in boxes_cxcywh.iter().enumerate() {
            for (row, value) in coords.iter().enumerate() {
                output[[0, row, i]] = *value;
            }
        }
        for (i, (class_idx, score)) in class_scores.iter().enumerate() {
            output[[0, 4 + class_idx, i]] = *score;
        }

        output
    }

    fn raw(xyxy: [f32; 4], confidence: f32, class_id: usize) -> RawDetection {
        RawDetection {
            xyxy,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_cxcywh_to_xyxy() {
        let [x1, y1, x2, y2] = cxcywh_to_xyxy(50.0, 50.0, 40.0, 20.0);
        assert!((x1 - 30.0).abs() < 1e-6);
        assert!((y1 - 40.0).abs() < 1e-6);
        assert!((x2 - 70.0).abs() < 1e-6);
        assert!((y2 - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_known_values() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6, "Identical boxes");
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0, "Disjoint boxes");

        // Half overlap: intersection 50, union 150
        let b = [5.0, 0.0, 15.0, 10.0];
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);

        // Degenerate boxes never divide by zero
        assert_eq!(iou(&[1.0, 1.0, 1.0, 1.0], &[1.0, 1.0, 1.0, 1.0]), 0.0);
    }

    /// Test that confidence threshold filters detections correctly
    #[test]
    fn test_confidence_threshold_filtering() {
        let boxes = vec![
            [20.0, 20.0, 10.0, 10.0],
            [60.0, 60.0, 10.0, 10.0],
            [100.0, 100.0, 10.0, 10.0],
        ];
        let class_scores = vec![(0, 0.2), (1, 0.25), (2, 0.8)];
        let output = create_yolo_output(boxes, class_scores, 3);

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &test_transform(640, 640))
            .unwrap();

        // Scores at or below the threshold are dropped
        assert_eq!(detections.len(), 1, "Should keep only confidence > 0.25");
        assert_eq!(detections[0].class_id, 2);
        assert!((detections[0].confidence - 0.8).abs() < 1e-6);
    }

    /// Test class ID extraction via argmax
    #[test]
    fn test_class_id_argmax() {
        let mut output = create_yolo_output(vec![[50.0, 50.0, 20.0, 20.0]], vec![(1, 0.6)], 4);
        output[[0, 4 + 3, 0]] = 0.9;
        output[[0, 4, 0]] = 0.3;

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &test_transform(640, 640))
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 3, "Highest scoring class wins");
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    /// Test coordinate inverse transformation with known values
    #[test]
    fn test_coordinate_inverse_transformation() {
        // Original image: 800x600, input 640x640
        // Scale = min(640/800, 640/600) = 0.8, resized 640x480, offset_y = 80
        //
        // Box cxcywh (320, 320, 128, 128) -> xyxy (256, 256, 384, 384)
        // After inverse transform:
        //   x1 = 256 / 0.8 = 320, y1 = (256 - 80) / 0.8 = 220
        //   x2 = 384 / 0.8 = 480, y2 = (384 - 80) / 0.8 = 380
        let output = create_yolo_output(vec![[320.0, 320.0, 128.0, 128.0]], vec![(0, 0.9)], 1);
        let transform = TransformParams {
            orig_width: 800,
            orig_height: 600,
            scale: 0.8,
            offset_x: 0.0,
            offset_y: 80.0,
        };

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &transform)
            .unwrap();

        assert_eq!(detections.len(), 1);
        let [x1, y1, x2, y2] = detections[0].xyxy;
        assert!((x1 - 320.0).abs() < 0.1, "x1 transformation incorrect: {}", x1);
        assert!((y1 - 220.0).abs() < 0.1, "y1 transformation incorrect: {}", y1);
        assert!((x2 - 480.0).abs() < 0.1, "x2 transformation incorrect: {}", x2);
        assert!((y2 - 380.0).abs() < 0.1, "y2 transformation incorrect: {}", y2);
    }

    /// Test that coordinates are clamped to image bounds
    #[test]
    fn test_coordinates_clamped_to_image_bounds() {
        let boxes = vec![
            [5.0, 5.0, 40.0, 40.0],     // Will result in negative coords after offset
            [395.0, 395.0, 40.0, 40.0], // Will exceed bounds
        ];
        let output = create_yolo_output(boxes, vec![(0, 0.9), (1, 0.9)], 2);
        let transform = TransformParams {
            orig_width: 400,
            orig_height: 400,
            scale: 1.0,
            offset_x: 10.0,
            offset_y: 10.0,
        };

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &transform)
            .unwrap();

        assert_eq!(detections.len(), 2);
        let low = detections.iter().find(|d| d.class_id == 0).unwrap();
        let high = detections.iter().find(|d| d.class_id == 1).unwrap();

        assert_eq!(low.xyxy[0], 0.0, "Negative x1 should be clamped to 0");
        assert_eq!(low.xyxy[1], 0.0, "Negative y1 should be clamped to 0");
        assert_eq!(high.xyxy[2], 400.0, "x2 exceeding width should be clamped");
        assert_eq!(high.xyxy[3], 400.0, "y2 exceeding height should be clamped");
    }

    #[test]
    fn test_overlapping_same_class_boxes_are_suppressed() {
        let boxes = vec![
            [100.0, 100.0, 50.0, 50.0],
            [102.0, 102.0, 50.0, 50.0], // heavy overlap with the first
            [300.0, 300.0, 50.0, 50.0],
        ];
        let output = create_yolo_output(boxes, vec![(0, 0.7), (0, 0.9), (0, 0.5)], 1);

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &test_transform(640, 640))
            .unwrap();

        assert_eq!(detections.len(), 2, "Weaker overlapping box is suppressed");
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
        assert!((detections[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_iou_threshold_controls_suppression() {
        // IoU of these two boxes is 1/3
        let detections = vec![
            raw([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            raw([5.0, 0.0, 15.0, 10.0], 0.8, 0),
        ];

        assert_eq!(non_maximum_suppression(detections.clone(), 0.45).len(), 2);
        assert_eq!(non_maximum_suppression(detections, 0.3).len(), 1);
    }

    #[test]
    fn test_overlap_but_different_classes_is_kept() {
        let detections = vec![
            raw([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            raw([0.0, 0.0, 10.0, 10.0], 0.8, 1),
        ];

        let kept = non_maximum_suppression(detections, 0.45);

        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_results_ordered_by_confidence() {
        let detections = vec![
            raw([0.0, 0.0, 10.0, 10.0], 0.3, 0),
            raw([50.0, 50.0, 60.0, 60.0], 0.9, 1),
            raw([100.0, 100.0, 110.0, 110.0], 0.6, 2),
        ];

        let kept = non_maximum_suppression(detections, 0.45);

        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.6, 0.3]);
    }

    #[test]
    fn test_max_detections_cap() {
        let n = 10;
        let boxes = (0..n).map(|i| [i as f32 * 50.0 + 20.0, 20.0, 10.0, 10.0]).collect();
        let scores = (0..n).map(|_| (0, 0.9)).collect();
        let output = create_yolo_output(boxes, scores, 1);

        let mut post_processor = PostProcessor::new(0.25, 0.45);
        post_processor.max_detections = 4;
        let detections = post_processor
            .parse_detections(&output.view(), &test_transform(640, 640))
            .unwrap();

        assert_eq!(detections.len(), 4);
    }

    /// Test that no detections are returned when all are below threshold
    #[test]
    fn test_zero_detections_when_all_below_threshold() {
        let boxes = vec![[10.0, 10.0, 5.0, 5.0], [30.0, 30.0, 5.0, 5.0]];
        let output = create_yolo_output(boxes, vec![(0, 0.1), (1, 0.2)], 2);

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &test_transform(640, 640))
            .unwrap();

        assert!(detections.is_empty(), "Should return no detections when all below threshold");
    }

    /// Test edge case: Empty detections (0 anchors)
    #[test]
    fn test_empty_input() {
        let output = Array::<f32, _>::zeros(IxDyn(&[1, 7, 0]));

        let detections = PostProcessor::new(0.25, 0.45)
            .parse_detections(&output.view(), &test_transform(640, 640))
            .unwrap();

        assert!(detections.is_empty(), "Empty input should return no detections");
    }

    #[test]
    fn test_unexpected_shape_is_rejected() {
        let post_processor = PostProcessor::new(0.25, 0.45);

        // Boxes only, no class rows
        let no_classes = Array::<f32, _>::zeros(IxDyn(&[1, 4, 300]));
        assert!(
            post_processor
                .parse_detections(&no_classes.view(), &test_transform(640, 640))
                .is_err()
        );

        let flat = Array::<f32, _>::zeros(IxDyn(&[84, 300]));
        assert!(
            post_processor
                .parse_detections(&flat.view(), &test_transform(640, 640))
                .is_err()
        );
    }
}
