use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::non_maximum_suppression;
use crate::detect::preset::{InferenceConfig, ModelVariant};
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::intake::DecodedImage;

enum Script {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Scripted backend for tests and dry runs.
///
/// Returns a fixed scene (filtered by the config exactly as a real backend
/// would) or a fixed failure. Counts how often `detect` was invoked.
pub struct StubBackend {
    name: &'static str,
    models: Vec<ModelVariant>,
    script: Script,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self {
            name: "stub",
            models: ModelVariant::ALL.to_vec(),
            script: Script::Detections(detections),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend that never finds anything.
    pub fn empty() -> Self {
        Self::with_detections(Vec::new())
    }

    /// A backend whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::Fail(message.to_string()),
            ..Self::empty()
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn serving(mut self, models: &[ModelVariant]) -> Self {
        self.models = models.to_vec();
        self
    }

    /// Sleep before answering, to exercise caller timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `detect` invocations.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, model: ModelVariant) -> bool {
        self.models.contains(&model)
    }

    fn detect(&mut self, _image: &DecodedImage, config: &InferenceConfig) -> Result<DetectionSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match &self.script {
            Script::Fail(message) => Err(anyhow!("{}", message)),
            Script::Detections(detections) => {
                let kept: Vec<Detection> = detections
                    .iter()
                    .filter(|d| d.confidence >= config.confidence_threshold)
                    .copied()
                    .collect();
                Ok(DetectionSet::new(non_maximum_suppression(
                    kept,
                    config.iou_threshold,
                    config.max_detections,
                )))
            }
        }
    }
}

/// Synthetic scene: `vehicles` cars plus `others` pedestrians, laid out on a
/// grid so no two boxes overlap.
pub fn synthetic_scene(vehicles: usize, others: usize) -> Vec<Detection> {
    let ids = std::iter::repeat(2u32)
        .take(vehicles)
        .chain(std::iter::repeat(0u32).take(others));
    ids.enumerate()
        .map(|(i, class_id)| {
            let col = (i % 16) as f32;
            let row = (i / 16) as f32;
            let bbox = BoundingBox::new(col * 40.0, row * 40.0, col * 40.0 + 30.0, row * 40.0 + 30.0);
            Detection::new(class_id, 0.9, bbox)
        })
        .collect()
}
