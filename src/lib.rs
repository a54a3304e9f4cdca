//! Traffic Density Signal Kernel
//!
//! Turns one traffic-scene image into a green-time recommendation:
//!
//! 1. **Intake** decodes the upload; bad input is rejected before inference.
//! 2. **Detect** runs a detector backend under one of three named presets
//!    (`fast-low-memory`, `balanced`, `high-recall`).
//! 3. **Decide** keeps vehicle classes (car, motorcycle, bus, truck), counts
//!    them, and maps the count through the threshold table:
//!
//! | vehicles | density | green time | severity |
//! |----------|---------|------------|----------|
//! | 0..=9    | LOW     | 30s        | success  |
//! | 10..=25  | MEDIUM  | 60s        | warning  |
//! | 26..     | HIGH    | 90s        | danger   |
//!
//! An empty scene is a valid LOW decision. A failed or timed-out detector is
//! a `SignalError`, never a zero count.

pub mod api;
pub mod config;
pub mod decision;
pub mod detect;
pub mod error;
pub mod intake;
pub mod pipeline;

pub use decision::{
    classify_count, decide, Decision, DensityLabel, SeverityTag, SignalDecisionEngine,
    ThresholdRow, ThresholdTable, VehicleClassSet, VEHICLE_CLASS_IDS,
};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionSet, DetectorBackend, InferenceConfig,
    ModelVariant, Preset, StubBackend,
};
pub use error::{SignalError, SignalResult};
pub use intake::{decode_image, load_image_file, DecodedImage};
pub use pipeline::{SignalPipeline, SignalReport};
