//! Raw detector output decoding and non-maximum suppression.

use anyhow::{anyhow, Result};

use crate::detect::preprocess::LetterboxTransform;
use crate::detect::result::Detection;

/// Decode a YOLOv8-style head laid out channel-major as
/// `[4 + classes, anchors]`: rows 0..4 are cx, cy, w, h in model space,
/// the remaining rows are per-class scores.
///
/// Keeps the best class per anchor when its score reaches
/// `confidence_threshold`, mapped back to source pixels.
pub fn decode_yolo_output(
    output: &[f32],
    channels: usize,
    anchors: usize,
    transform: &LetterboxTransform,
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    if channels < 5 {
        return Err(anyhow!(
            "detector output has {} channels, expected at least 5",
            channels
        ));
    }
    let expected = channels
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("detector output dimensions overflow"))?;
    if output.len() != expected {
        return Err(anyhow!(
            "detector output length {} does not match {}x{}",
            output.len(),
            channels,
            anchors
        ));
    }

    let at = |channel: usize, anchor: usize| output[channel * anchors + anchor];
    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..channels - 4 {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < confidence_threshold {
            continue;
        }
        let bbox = transform.to_source(
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        detections.push(Detection::new(best_class as u32, best_score, bbox));
    }
    Ok(detections)
}

/// Class-aware greedy NMS, highest confidence first, capped at `max_detections`.
///
/// Boxes of different classes never suppress each other.
pub fn non_maximum_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(class_id: u32, confidence: f32, x: f32) -> Detection {
        Detection::new(class_id, confidence, BoundingBox::new(x, 0.0, x + 10.0, 10.0))
    }

    #[test]
    fn nms_suppresses_same_class_overlap() {
        let kept = non_maximum_suppression(vec![det(2, 0.6, 1.0), det(2, 0.9, 0.0)], 0.5, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_other_classes() {
        let kept = non_maximum_suppression(vec![det(2, 0.9, 0.0), det(7, 0.8, 0.0)], 0.5, 10);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn lower_iou_threshold_suppresses_more() {
        // IoU of these two boxes is 0.6.
        let pair = vec![det(2, 0.9, 0.0), det(2, 0.8, 2.5)];
        assert_eq!(non_maximum_suppression(pair.clone(), 0.7, 10).len(), 2);
        assert_eq!(non_maximum_suppression(pair, 0.5, 10).len(), 1);
    }

    #[test]
    fn nms_respects_cap() {
        let many: Vec<Detection> = (0..20).map(|i| det(2, 0.5, i as f32 * 20.0)).collect();
        assert_eq!(non_maximum_suppression(many, 0.5, 7).len(), 7);
    }

    #[test]
    fn decodes_best_class_above_threshold() {
        // 4 box rows + 3 classes, 2 anchors.
        let anchors = 2;
        let output = vec![
            10.0, 50.0, // cx
            10.0, 50.0, // cy
            4.0, 8.0, // w
            4.0, 8.0, // h
            0.1, 0.05, // class 0
            0.2, 0.1, // class 1
            0.8, 0.2, // class 2
        ];
        let transform = LetterboxTransform::new(100, 100, 100);
        let dets = decode_yolo_output(&output, 7, anchors, &transform, 0.25).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 2);
        assert!((dets[0].confidence - 0.8).abs() < 1e-6);
        assert_eq!(dets[0].bbox, BoundingBox::new(8.0, 8.0, 12.0, 12.0));
    }

    #[test]
    fn rejects_mismatched_output_shape() {
        let transform = LetterboxTransform::new(10, 10, 10);
        assert!(decode_yolo_output(&[0.0; 10], 7, 2, &transform, 0.25).is_err());
        assert!(decode_yolo_output(&[0.0; 8], 4, 2, &transform, 0.25).is_err());
    }
}
