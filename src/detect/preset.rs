use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::SignalError;

/// Model weights a backend can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// YOLOv8 nano: smallest footprint.
    Nano,
    /// YOLOv8 small: more parameters, better recall on occluded vehicles.
    Small,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Nano, ModelVariant::Small];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Nano => "nano",
            ModelVariant::Small => "small",
        }
    }

    /// Default ONNX file name inside the model directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ModelVariant::Nano => "yolov8n.onnx",
            ModelVariant::Small => "yolov8s.onnx",
        }
    }

    /// Distinct input sizes the presets run this variant at, ascending.
    pub fn preset_input_sizes(self) -> Vec<u32> {
        let mut sizes: Vec<u32> = Preset::ALL
            .iter()
            .map(|preset| preset.config())
            .filter(|config| config.model == self)
            .map(|config| config.input_size)
            .collect();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named operating points on the speed / memory / recall curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Preset {
    #[serde(rename = "fast-low-memory")]
    FastLowMemory,
    #[serde(rename = "balanced")]
    Balanced,
    #[serde(rename = "high-recall")]
    HighRecall,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::FastLowMemory, Preset::Balanced, Preset::HighRecall];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::FastLowMemory => "fast-low-memory",
            Preset::Balanced => "balanced",
            Preset::HighRecall => "high-recall",
        }
    }

    pub fn config(&self) -> InferenceConfig {
        InferenceConfig::preset(*self)
    }
}

impl Default for Preset {
    fn default() -> Self {
        Preset::Balanced
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Preset::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                SignalError::ConfigurationError(format!(
                    "unknown inference preset '{}' (expected one of: {})",
                    wanted,
                    Preset::ALL.map(|p| p.as_str()).join(", ")
                ))
            })
    }
}

/// Detector overlap threshold used when a preset does not lower it.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
pub const STANDARD_CONFIDENCE: f32 = 0.25;
pub const FULL_INPUT_SIZE: u32 = 640;
pub const MAX_DETECTIONS: usize = 300;

/// Detector tuning handed to a backend. Opaque to the decision engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct InferenceConfig {
    pub preset: Preset,
    pub model: ModelVariant,
    /// Square letterbox side in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl InferenceConfig {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::FastLowMemory => Self {
                preset,
                model: ModelVariant::Nano,
                input_size: 320,
                confidence_threshold: STANDARD_CONFIDENCE,
                iou_threshold: DEFAULT_IOU_THRESHOLD,
                max_detections: MAX_DETECTIONS,
            },
            Preset::Balanced => Self {
                preset,
                model: ModelVariant::Nano,
                input_size: FULL_INPUT_SIZE,
                confidence_threshold: STANDARD_CONFIDENCE,
                iou_threshold: DEFAULT_IOU_THRESHOLD,
                max_detections: MAX_DETECTIONS,
            },
            // Lower IoU keeps adjacent boxes alive in dense, overlapping traffic.
            Preset::HighRecall => Self {
                preset,
                model: ModelVariant::Small,
                input_size: FULL_INPUT_SIZE,
                confidence_threshold: 0.15,
                iou_threshold: 0.5,
                max_detections: MAX_DETECTIONS,
            },
        }
    }

    /// Resolve a preset by name. Unknown names never reach a backend.
    pub fn named(name: &str) -> Result<Self, SignalError> {
        name.parse::<Preset>().map(Self::preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_preset_names() {
        for preset in Preset::ALL {
            assert_eq!(preset.as_str().parse::<Preset>().unwrap(), preset);
        }
        assert_eq!(" High-Recall ".parse::<Preset>().unwrap(), Preset::HighRecall);
    }

    #[test]
    fn lists_input_sizes_per_variant() {
        assert_eq!(ModelVariant::Nano.preset_input_sizes(), vec![320, FULL_INPUT_SIZE]);
        assert_eq!(ModelVariant::Small.preset_input_sizes(), vec![FULL_INPUT_SIZE]);
    }

    #[test]
    fn unknown_preset_is_configuration_error() {
        let err = InferenceConfig::named("turbo").unwrap_err();
        assert!(matches!(err, SignalError::ConfigurationError(_)));
        assert!(err.to_string().contains("turbo"));
    }

    #[test]
    fn preset_parameters_match_operating_points() {
        let fast = InferenceConfig::preset(Preset::FastLowMemory);
        let balanced = InferenceConfig::preset(Preset::Balanced);
        let recall = InferenceConfig::preset(Preset::HighRecall);

        assert_eq!(fast.model, ModelVariant::Nano);
        assert!(fast.input_size < balanced.input_size);
        assert_eq!(fast.confidence_threshold, 0.25);
        assert_eq!(fast.iou_threshold, DEFAULT_IOU_THRESHOLD);

        assert_eq!(balanced.model, ModelVariant::Nano);
        assert_eq!(balanced.input_size, 640);
        assert_eq!(balanced.confidence_threshold, 0.25);

        assert_eq!(recall.model, ModelVariant::Small);
        assert_eq!(recall.input_size, 640);
        assert_eq!(recall.confidence_threshold, 0.15);
        assert_eq!(recall.iou_threshold, 0.5);
    }

    #[test]
    fn preset_serializes_with_kebab_name() {
        let json = serde_json::to_string(&Preset::FastLowMemory).unwrap();
        assert_eq!(json, "\"fast-low-memory\"");
    }
}
