use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::detect::preset::ModelVariant;
use crate::error::{SignalError, SignalResult};

use super::backend::DetectorBackend;

pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// A registered backend with its capabilities captured at registration.
///
/// Selection reads `name` and `models` only, so it never waits on a backend
/// that is busy with (or stuck in) a detection.
#[derive(Clone)]
pub struct RegisteredBackend {
    name: String,
    models: Vec<ModelVariant>,
    backend: SharedBackend,
}

impl RegisteredBackend {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports(&self, model: ModelVariant) -> bool {
        self.models.contains(&model)
    }

    pub fn shared(&self) -> SharedBackend {
        self.backend.clone()
    }
}

/// Lock a backend, recovering it if an earlier call panicked mid-detection.
///
/// A panic fails only the request it happened in; the backend stays usable.
pub fn lock_backend(backend: &SharedBackend) -> MutexGuard<'_, dyn DetectorBackend + 'static> {
    backend.lock().unwrap_or_else(|poisoned| {
        log::warn!("recovering detector backend after a panicked call");
        backend.clear_poison();
        PoisonError::into_inner(poisoned)
    })
}

/// Thread-safe registry of detector backends.
///
/// Built once at startup and read-only afterwards. Backends are wrapped in
/// `Mutex` because `DetectorBackend::detect` takes `&mut self`, which also
/// serialises concurrent requests per backend instance.
pub struct BackendRegistry {
    backends: HashMap<String, RegisteredBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        let models: Vec<ModelVariant> = ModelVariant::ALL
            .into_iter()
            .filter(|model| backend.supports(*model))
            .collect();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        log::debug!("registered detector backend '{}' serving {:?}", name, models);
        self.backends.insert(
            name.clone(),
            RegisteredBackend {
                name,
                models,
                backend: Arc::new(Mutex::new(backend)),
            },
        );
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> SignalResult<()> {
        if !self.backends.contains_key(name) {
            return Err(SignalError::ConfigurationError(format!(
                "backend '{}' not registered",
                name
            )));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredBackend> {
        self.backends.get(name)
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<&RegisteredBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Select a backend that serves the requested model variant.
    ///
    /// Prefers the default backend when it supports the variant. Never locks
    /// a backend.
    pub fn backend_for_model(&self, model: ModelVariant) -> SignalResult<&RegisteredBackend> {
        if let Some(default_backend) = self.default_backend() {
            if default_backend.supports(model) {
                return Ok(default_backend);
            }
        }

        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| &self.backends[name])
            .find(|entry| entry.supports(model))
            .ok_or_else(|| {
                SignalError::ConfigurationError(format!(
                    "no registered backend serves model variant '{}'",
                    model
                ))
            })
    }

    /// Run warm-up on every registered backend.
    pub fn warm_up_all(&self) -> anyhow::Result<()> {
        for name in self.list() {
            if let Some(entry) = self.get(&name) {
                lock_backend(&entry.backend).warm_up()?;
            }
        }
        Ok(())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use std::time::{Duration, Instant};

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::empty().named("stub-a"));
        registry.register(StubBackend::empty().named("stub-b"));
        let default = registry.default_backend().unwrap();
        assert_eq!(default.name(), "stub-a");
        assert_eq!(registry.list(), vec!["stub-a", "stub-b"]);
    }

    #[test]
    fn selects_backend_serving_model() {
        let mut registry = BackendRegistry::new();
        registry.register(
            StubBackend::empty()
                .named("nano-only")
                .serving(&[ModelVariant::Nano]),
        );
        registry.register(
            StubBackend::empty()
                .named("small-only")
                .serving(&[ModelVariant::Small]),
        );

        let small = registry.backend_for_model(ModelVariant::Small).unwrap();
        assert_eq!(small.name(), "small-only");
        let nano = registry.backend_for_model(ModelVariant::Nano).unwrap();
        assert_eq!(nano.name(), "nano-only");
    }

    #[test]
    fn missing_model_is_configuration_error() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::empty().serving(&[ModelVariant::Nano]));
        let err = registry.backend_for_model(ModelVariant::Small).err().unwrap();
        assert!(matches!(err, SignalError::ConfigurationError(_)));
    }

    #[test]
    fn selection_does_not_wait_on_a_busy_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::empty());
        let shared = registry.get("stub").unwrap().shared();
        let _busy = shared.lock().unwrap();

        let started = Instant::now();
        let entry = registry.backend_for_model(ModelVariant::Nano).unwrap();
        assert_eq!(entry.name(), "stub");
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn poisoned_backend_is_recovered() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::empty());
        let shared = registry.get("stub").unwrap().shared();
        let poisoner = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("detector blew up");
        })
        .join();
        assert!(shared.is_poisoned());

        assert_eq!(lock_backend(&shared).name(), "stub");
        assert!(!shared.is_poisoned());
        assert!(registry.warm_up_all().is_ok());
    }

    #[test]
    fn set_default_rejects_unknown_backend() {
        let mut registry = BackendRegistry::new();
        assert!(registry.set_default("tract-nano").is_err());
        registry.register(StubBackend::empty());
        assert!(registry.set_default("stub").is_ok());
    }
}
