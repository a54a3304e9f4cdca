mod backend;
pub mod backends;
pub mod postprocess;
pub mod preprocess;
mod preset;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{load_model_backends, synthetic_scene, StubBackend};
pub use preset::{
    InferenceConfig, ModelVariant, Preset, DEFAULT_IOU_THRESHOLD, FULL_INPUT_SIZE, MAX_DETECTIONS,
    STANDARD_CONFIDENCE,
};
pub use registry::{lock_backend, BackendRegistry, RegisteredBackend, SharedBackend};
pub use result::{BoundingBox, Detection, DetectionSet, COCO_CLASSES};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
