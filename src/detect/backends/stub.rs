use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{Detector, ModelLoader};
use crate::detect::registry::ModelHandle;
use crate::detect::result::DetectionResult;

#[derive(Clone, Debug)]
enum Step {
    Detect(DetectionResult),
    Fail(String),
}

/// Scripted backend for testing and dry runs.
///
/// Each `infer` call consumes the next scripted step; once the script is
/// exhausted the fallback result is returned. Threshold filtering is applied
/// to every result so the stub honours the `Detector` contract.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    script: VecDeque<Step>,
    fallback: DetectionResult,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next unscripted call.
    pub fn then_detect(mut self, result: DetectionResult) -> Self {
        self.script.push_back(Step::Detect(result));
        self
    }

    /// Queue an inference failure.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Step::Fail(message.to_string()));
        self
    }

    /// Result returned after the script runs out.
    pub fn with_fallback(mut self, result: DetectionResult) -> Self {
        self.fallback = result;
        self
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn infer(&mut self, _image: &RgbImage, threshold: f32) -> Result<DetectionResult> {
        match self.script.pop_front() {
            Some(Step::Detect(result)) => Ok(result.retain_above(threshold)),
            Some(Step::Fail(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone().retain_above(threshold)),
        }
    }
}

/// Loader that hands out clones of a template `StubBackend` and records which
/// models were bound.
#[derive(Clone, Default)]
pub struct StubLoader {
    template: StubBackend,
    loaded: Arc<Mutex<Vec<String>>>,
    fail_with: Option<String>,
}

impl StubLoader {
    pub fn new(template: StubBackend) -> Self {
        Self {
            template,
            ..Self::default()
        }
    }

    /// A loader whose every `load` fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Names of the models bound so far, in order.
    pub fn loaded(&self) -> Vec<String> {
        self.loaded
            .lock()
            .map(|loaded| loaded.clone())
            .unwrap_or_default()
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, model: &ModelHandle) -> Result<Box<dyn Detector>> {
        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{}: {}", model.name(), message));
        }
        self.loaded
            .lock()
            .map_err(|_| anyhow!("stub loader lock poisoned"))?
            .push(model.name().to_string());
        Ok(Box::new(self.template.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, Detection};

    fn person(confidence: f32) -> DetectionResult {
        DetectionResult::new(vec![Detection {
            class_id: 0,
            label: "person".into(),
            confidence,
            bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
        }])
    }

    #[test]
    fn stub_follows_script_then_fallback() {
        let mut backend = StubBackend::new()
            .then_detect(person(0.8))
            .then_fail("boom")
            .with_fallback(person(0.4));
        let frame = RgbImage::new(4, 4);

        assert_eq!(backend.infer(&frame, 0.6).unwrap().len(), 1);
        assert!(backend.infer(&frame, 0.6).is_err());
        assert!(backend.infer(&frame, 0.6).unwrap().is_empty());
        assert_eq!(backend.infer(&frame, 0.3).unwrap().len(), 1);
    }

    #[test]
    fn loader_records_bound_models() {
        let loader = StubLoader::new(StubBackend::new());
        loader.load(&ModelHandle::new("a.onnx", "/m/a.onnx")).unwrap();
        loader.load(&ModelHandle::new("b.onnx", "/m/b.onnx")).unwrap();
        assert_eq!(loader.loaded(), vec!["a.onnx", "b.onnx"]);

        let failing = StubLoader::failing("corrupt weights");
        let err = failing
            .load(&ModelHandle::new("a.onnx", "/m/a.onnx"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("corrupt weights"));
    }
}
