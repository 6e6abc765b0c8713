/// Axis-aligned box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build from a centre point and size, as YOLO heads report boxes.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width as f32;
        let max_y = height as f32;
        Self {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }

    /// Intersection over union. Degenerate or non-finite boxes yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        let iou = inter / union;
        if iou.is_finite() {
            iou.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// One detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    /// Drop detections whose confidence is below `threshold`.
    pub fn retain_above(mut self, threshold: f32) -> Self {
        self.detections.retain(|d| d.confidence >= threshold);
        self
    }

    /// Short human-readable list such as `person 0.81, dog 0.66`.
    pub fn summary(&self) -> String {
        self.detections
            .iter()
            .map(|d| format!("{} {:.2}", d.label, d.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Greedy per-class non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, confidence: f32, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            label: format!("class{class_id}"),
            confidence,
            bbox,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn from_center_normalizes_corners() {
        let b = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(b, BoundingBox::new(40.0, 35.0, 60.0, 45.0));
        assert_eq!(b.area(), 200.0);
    }

    #[test]
    fn nms_keeps_best_overlapping_box_per_class() {
        let detections = vec![
            det(0, 0.6, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            det(0, 0.9, BoundingBox::new(1.0, 1.0, 11.0, 11.0)),
            det(1, 0.7, BoundingBox::new(1.0, 1.0, 11.0, 11.0)),
            det(0, 0.5, BoundingBox::new(50.0, 50.0, 60.0, 60.0)),
        ];
        let kept = non_max_suppression(detections, 0.45);
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.5]);
    }

    #[test]
    fn retain_above_filters_by_threshold() {
        let result = DetectionResult::new(vec![
            det(0, 0.8, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            det(1, 0.3, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
        ])
        .retain_above(0.6);
        assert_eq!(result.len(), 1);
        assert_eq!(result.summary(), "class0 0.80");
    }
}
