mod annotate;
mod backend;
pub mod backends;
mod registry;
mod result;

pub use annotate::draw_detections;
pub use backend::{Detector, ModelLoader};
pub use backends::{StubBackend, StubLoader};
pub use registry::{ModelHandle, ModelRegistry};
pub use result::{non_max_suppression, BoundingBox, Detection, DetectionResult};

#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractLoader};
