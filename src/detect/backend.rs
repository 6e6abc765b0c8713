use anyhow::Result;
use image::RgbImage;

use crate::detect::annotate::draw_detections;
use crate::detect::registry::ModelHandle;
use crate::detect::result::DetectionResult;

/// Object detector bound to one model.
///
/// Detection runs inline on the dispatcher task, so implementations should do
/// bounded local work only: no network requests, no disk writes beyond model
/// loading.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Run detection on a frame. Detections below `threshold` must not be returned.
    fn infer(&mut self, image: &RgbImage, threshold: f32) -> Result<DetectionResult>;

    /// Produce an annotated copy of `image` showing `detections`.
    fn render(&self, image: &RgbImage, detections: &DetectionResult) -> Result<RgbImage> {
        Ok(draw_detections(image, detections))
    }

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Binds a `ModelHandle` to a ready-to-run `Detector`.
///
/// Loading may be slow (weights, graph optimization); callers run it off the
/// async executor.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model: &ModelHandle) -> Result<Box<dyn Detector>>;
}
