use anyhow::Result;

use crate::detect::preset::{InferenceConfig, ModelVariant};
use crate::detect::result::DetectionSet;
use crate::intake::DecodedImage;

/// Detector backend trait.
///
/// One stable call regardless of which weights or tuning are selected.
/// Implementations must:
/// - Treat the image as read-only and not retain it past `detect`
/// - Apply the config's confidence threshold, overlap threshold and cap
/// - Return the complete set for the whole image, or an error (never partial)
///
/// `detect` takes `&mut self` so backends can own inference sessions; the
/// registry serialises access per instance.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can serve the model variant.
    fn supports(&self, model: ModelVariant) -> bool;

    /// Run detection on a decoded image.
    fn detect(&mut self, image: &DecodedImage, config: &InferenceConfig) -> Result<DetectionSet>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
