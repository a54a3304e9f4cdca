#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::decision::VehicleClassSet;
use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{decode_yolo_output, non_maximum_suppression};
use crate::detect::preprocess::letterbox;
use crate::detect::preset::{InferenceConfig, ModelVariant};
use crate::detect::result::{DetectionSet, COCO_CLASSES};
use crate::intake::DecodedImage;

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Serves one model variant. A runnable plan is built per input size during
/// warm-up (or on first use) and cached, so presets sharing weights share
/// the file.
/// It performs no network I/O and writes nothing to disk.
pub struct TractBackend {
    name: &'static str,
    model_path: PathBuf,
    variant: ModelVariant,
    plans: HashMap<u32, Plan>,
}

impl TractBackend {
    /// Prepare a backend for the ONNX file at `model_path`.
    ///
    /// Fails when the file is missing or the vehicle class set does not
    /// line up with the model's taxonomy.
    pub fn new<P: AsRef<Path>>(model_path: P, variant: ModelVariant) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(anyhow!("model file {} not found", model_path.display()));
        }
        VehicleClassSet::standard()
            .validate_against(&COCO_CLASSES)
            .context("vehicle classes do not match the model taxonomy")?;
        let name = match variant {
            ModelVariant::Nano => "tract-nano",
            ModelVariant::Small => "tract-small",
        };
        Ok(Self {
            name,
            model_path,
            variant,
            plans: HashMap::new(),
        })
    }

    fn plan(&mut self, size: u32) -> Result<&Plan> {
        if !self.plans.contains_key(&size) {
            log::info!(
                "loading {} model {} at {}x{}",
                self.variant,
                self.model_path.display(),
                size,
                size
            );
            let plan = load_plan(&self.model_path, size)?;
            self.plans.insert(size, plan);
        }
        self.plans
            .get(&size)
            .ok_or_else(|| anyhow!("model plan for size {} missing", size))
    }
}

fn load_plan(path: &Path, size: u32) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, size as usize, size as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, model: ModelVariant) -> bool {
        model == self.variant
    }

    fn detect(&mut self, image: &DecodedImage, config: &InferenceConfig) -> Result<DetectionSet> {
        if config.model != self.variant {
            return Err(anyhow!(
                "backend {} cannot serve model variant {}",
                self.name,
                config.model
            ));
        }
        let size = config.input_size;
        let (pixels, transform) = letterbox(image, size)?;
        let input: Tensor =
            tract_ndarray::Array4::from_shape_vec((1, 3, size as usize, size as usize), pixels)
                .context("failed to shape input tensor")?
                .into();

        let outputs = self
            .plan(size)?
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);
        let values = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;

        let raw = decode_yolo_output(
            values,
            channels,
            anchors,
            &transform,
            config.confidence_threshold,
        )?;
        let kept = non_maximum_suppression(raw, config.iou_threshold, config.max_detections);
        log::debug!(
            "{}: {} detections at {}px (conf>={}, iou={})",
            self.name,
            kept.len(),
            size,
            config.confidence_threshold,
            config.iou_threshold
        );
        Ok(DetectionSet::new(kept))
    }

    /// Build a plan for every input size a preset uses with this variant, so
    /// no request pays for model loading and fixed-shape exports fail here.
    fn warm_up(&mut self) -> Result<()> {
        let name = self.name;
        for size in self.variant.preset_input_sizes() {
            self.plan(size)
                .with_context(|| format!("warm-up of {} at {}px failed", name, size))?;
        }
        Ok(())
    }
}
