#![cfg(feature = "backend-tract")]

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, ModelLoader};
use crate::detect::registry::ModelHandle;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection, DetectionResult};

const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based YOLO detector for ONNX exports of YOLOv8/YOLO11 style heads.
///
/// The model is expected to take a `1x3xSxS` RGB tensor scaled to [0, 1] and
/// produce `1x(4+C)xN` (or the transposed `1xNx(4+C)`) box/score rows. Class
/// labels come from a sidecar `<model>.names` file (one label per line) when
/// present, otherwise COCO labels are assumed.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels: load_labels(model_path)?,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the IoU threshold used for non-maximum suppression.
    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let size = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class {}", class_id))
    }

    fn decode(
        &self,
        output: &Tensor,
        image_width: u32,
        image_height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a rank-3 detection output")?;
        let (rows, cols) = (view.shape()[1], view.shape()[2]);
        let transposed = rows > cols;
        let (attributes, candidates) = if transposed { (cols, rows) } else { (rows, cols) };
        if attributes < 5 {
            return Err(anyhow!(
                "detection output has {} attributes per box, expected at least 5",
                attributes
            ));
        }
        let at = |attribute: usize, candidate: usize| {
            if transposed {
                view[[0, candidate, attribute]]
            } else {
                view[[0, attribute, candidate]]
            }
        };

        let scale_x = image_width as f32 / self.input_size as f32;
        let scale_y = image_height as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for candidate in 0..candidates {
            let (class_id, confidence) = (4..attributes)
                .map(|attribute| (attribute - 4, at(attribute, candidate)))
                .fold((0, f32::NEG_INFINITY), |best, current| {
                    if current.1 > best.1 {
                        current
                    } else {
                        best
                    }
                });
            if confidence.is_nan() || confidence < threshold {
                continue;
            }
            let bbox = BoundingBox::from_center(
                at(0, candidate) * scale_x,
                at(1, candidate) * scale_y,
                at(2, candidate) * scale_x,
                at(3, candidate) * scale_y,
            )
            .clamp_to(image_width, image_height);
            detections.push(Detection {
                class_id,
                label: self.label(class_id),
                confidence: confidence.min(1.0),
                bbox,
            });
        }
        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &str {
        "tract-yolo"
    }

    fn infer(&mut self, image: &RgbImage, threshold: f32) -> Result<DetectionResult> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let detections = self.decode(output, image.width(), image.height(), threshold)?;
        Ok(DetectionResult::new(detections))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.infer(&blank, 1.0).map(|_| ())
    }
}

/// Loads `TractBackend`s for models in the registry.
#[derive(Clone, Debug)]
pub struct TractLoader {
    input_size: u32,
}

impl TractLoader {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }
}

impl ModelLoader for TractLoader {
    fn load(&self, model: &ModelHandle) -> Result<Box<dyn Detector>> {
        let backend = TractBackend::new(model.path(), self.input_size)
            .with_context(|| format!("load model '{}'", model.name()))?;
        Ok(Box::new(backend))
    }
}

fn load_labels(model_path: &Path) -> Result<Vec<String>> {
    let names_path = model_path.with_extension("names");
    if !names_path.is_file() {
        return Ok(COCO_LABELS.iter().map(|label| label.to_string()).collect());
    }
    let raw = fs::read_to_string(&names_path)
        .with_context(|| format!("read class labels {}", names_path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
