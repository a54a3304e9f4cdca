pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{synthetic_scene, StubBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::Result;

use crate::config::ModelSettings;
use crate::detect::registry::BackendRegistry;

/// Build the model-backed registry from configured weight files.
///
/// Variants whose weights are absent are skipped with a warning; presets that
/// need them are then rejected per request as configuration errors.
#[cfg(feature = "backend-tract")]
pub fn load_model_backends(models: &ModelSettings) -> Result<BackendRegistry> {
    use crate::detect::preset::ModelVariant;

    let mut registry = BackendRegistry::new();
    for variant in ModelVariant::ALL {
        let path = models.path_for(variant);
        if !path.is_file() {
            log::warn!(
                "no {} weights at {}; presets using it will be rejected",
                variant,
                path.display()
            );
            continue;
        }
        registry.register(TractBackend::new(&path, variant)?);
    }
    if registry.is_empty() {
        return Err(anyhow::anyhow!(
            "no model weights found under {}",
            models.dir.display()
        ));
    }
    Ok(registry)
}

#[cfg(not(feature = "backend-tract"))]
pub fn load_model_backends(_models: &ModelSettings) -> Result<BackendRegistry> {
    Err(anyhow::anyhow!(
        "model inference requires the backend-tract feature"
    ))
}
