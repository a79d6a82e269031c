//! YOLO plate detector via ONNX Runtime
//!
//! Expects an Ultralytics-style export with a single output of shape
//! `[1, 4 + classes, anchors]` (or its transpose): box centre and size in
//! input pixels followed by one score per class.

use anyhow::Result;
use image::RgbImage;
use std::path::Path;
use tracing::debug;

use super::detection::{Detection, Detector};
use super::models::OnnxSession;
use super::preprocess::{letterbox, Letterbox};
use crate::config::DetectorConfig;

/// Plate detector backed by an ONNX YOLO model
pub struct YoloDetector {
    session: OnnxSession,
    labels: Vec<String>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    /// Load the model named in the detector config
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let labels = config.resolve_labels()?;
        Self::new(
            &config.model_path,
            labels,
            config.input_size,
            config.confidence_threshold,
            config.iou_threshold,
            config.use_gpu,
        )
    }

    pub fn new(
        model_path: &Path,
        labels: Vec<String>,
        input_size: u32,
        confidence_threshold: f32,
        iou_threshold: f32,
        use_gpu: bool,
    ) -> Result<Self> {
        let session = OnnxSession::new(model_path, use_gpu)?;
        Ok(Self {
            session,
            labels,
            input_size,
            confidence_threshold,
            iou_threshold,
        })
    }
}

impl Detector for YoloDetector {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (tensor, geometry) = letterbox(image, self.input_size);
        let (shape, data) = self.session.run(tensor)?;

        let detections = decode_output(
            &shape,
            &data,
            self.labels.len(),
            self.confidence_threshold,
            &geometry,
        )?;
        let detections = non_max_suppression(detections, self.iou_threshold);

        debug!("YOLO: {} detection(s) after NMS", detections.len());
        Ok(detections)
    }
}

/// Decode raw YOLO output into frame-space detections above `threshold`
pub fn decode_output(
    shape: &[i64],
    data: &[f32],
    num_classes: usize,
    threshold: f32,
    geometry: &Letterbox,
) -> Result<Vec<Detection>> {
    if shape.len() != 3 {
        anyhow::bail!("Unexpected detector output shape {:?}", shape);
    }

    let channels = 4 + num_classes;
    let (dim1, dim2) = (shape[1] as usize, shape[2] as usize);

    // Channel-major [1, C, N] or anchor-major [1, N, C]
    let (anchors, anchor_stride, channel_stride) = if dim1 == channels {
        (dim2, 1, dim2)
    } else if dim2 == channels {
        (dim1, channels, 1)
    } else {
        anyhow::bail!(
            "Detector output {:?} does not match {} classes",
            shape,
            num_classes
        );
    };

    if data.len() < anchors * channels {
        anyhow::bail!("Detector output truncated: {} values", data.len());
    }

    let value = |anchor: usize, channel: usize| data[anchor * anchor_stride + channel * channel_stride];

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for class_id in 0..num_classes {
            let score = value(anchor, 4 + class_id);
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }

        if best_score < threshold {
            continue;
        }

        let (cx, cy) = (value(anchor, 0), value(anchor, 1));
        let (w, h) = (value(anchor, 2), value(anchor, 3));
        let (x1, y1) = geometry.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_source(cx + w / 2.0, cy + h / 2.0);

        detections.push(Detection {
            x1,
            y1,
            x2,
            y2,
            class_id: best_class,
            confidence: best_score,
        });
    }

    Ok(detections)
}

/// Per-class non-maximum suppression
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) >= iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

/// Intersection over union of two boxes
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        }
    }

    #[test]
    fn test_decode_channel_major() {
        // Two classes, three anchors: [1, 6, 3]
        #[rustfmt::skip]
        let data = vec![
            50.0, 10.0, 0.0,  // cx
            40.0, 10.0, 0.0,  // cy
            20.0, 4.0, 0.0,   // w
            10.0, 4.0, 0.0,   // h
            0.1, 0.2, 0.0,    // class 0
            0.9, 0.1, 0.0,    // class 1
        ];
        let detections = decode_output(&[1, 6, 3], &data, 2, 0.25, &identity()).unwrap();

        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.class_id, 1);
        assert!((d.x1 - 40.0).abs() < 1e-5 && (d.x2 - 60.0).abs() < 1e-5);
        assert!((d.y1 - 35.0).abs() < 1e-5 && (d.y2 - 45.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_anchor_major_with_letterbox() {
        // One anchor, one class: [1, 1, 5]
        let data = vec![32.0, 32.0, 16.0, 8.0, 0.8];
        let geometry = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 8.0,
        };
        let detections = decode_output(&[1, 1, 5], &data, 1, 0.25, &geometry).unwrap();

        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert!((d.x1 - 48.0).abs() < 1e-5);
        assert!((d.y1 - 40.0).abs() < 1e-5);
        assert!((d.x2 - 80.0).abs() < 1e-5);
        assert!((d.y2 - 56.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_rejects_class_mismatch() {
        assert!(decode_output(&[1, 7, 3], &[0.0; 21], 2, 0.25, &identity()).is_err());
    }

    #[test]
    fn test_iou() {
        let a = boxed(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = boxed(5.0, 0.0, 15.0, 10.0, 0, 0.9);
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-5);
        assert_eq!(iou(&a, &boxed(20.0, 20.0, 30.0, 30.0, 0, 0.9)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_per_class() {
        let detections = vec![
            boxed(0.0, 0.0, 10.0, 10.0, 0, 0.6),
            boxed(1.0, 0.0, 11.0, 10.0, 0, 0.9),
            boxed(1.0, 0.0, 11.0, 10.0, 1, 0.5),
            boxed(50.0, 50.0, 60.0, 60.0, 0, 0.4),
        ];
        let kept = non_max_suppression(detections, 0.45);

        assert_eq!(kept.len(), 3);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[1].class_id, 1);
        assert!((kept[2].confidence - 0.4).abs() < 1e-6);
    }
}
