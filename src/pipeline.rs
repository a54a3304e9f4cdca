//! Request-scoped orchestration: preset → decode → detect → decide.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::decision::{Decision, SignalDecisionEngine};
use crate::detect::{
    lock_backend, BackendRegistry, DetectionSet, InferenceConfig, Preset, SharedBackend,
};
use crate::error::{SignalError, SignalResult};
use crate::intake::{decode_image, DecodedImage};

/// Decision plus the context it was produced under.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignalReport {
    pub preset: Preset,
    pub backend: String,
    /// All detections returned by the backend, vehicle or not.
    pub total_detections: usize,
    #[serde(flatten)]
    pub decision: Decision,
    pub elapsed_ms: u64,
}

/// Shared, read-only pipeline. One instance serves every request.
pub struct SignalPipeline {
    registry: BackendRegistry,
    engine: &'static SignalDecisionEngine,
    detect_timeout: Option<Duration>,
}

impl SignalPipeline {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            engine: SignalDecisionEngine::standard(),
            detect_timeout: None,
        }
    }

    /// Bound each detector call. Slow calls surface as `DetectionTimeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.detect_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Run the full pipeline over encoded image bytes.
    ///
    /// The preset is resolved first and the image decoded second, so neither
    /// an unknown preset nor a bad upload ever reaches a backend.
    pub fn run(&self, image_bytes: &[u8], preset_name: &str) -> SignalResult<SignalReport> {
        let config = InferenceConfig::named(preset_name)?;
        let image = decode_image(image_bytes)?;
        self.run_decoded(Arc::new(image), &config)
    }

    /// Run detect + decide over an already-decoded image.
    pub fn run_decoded(
        &self,
        image: Arc<DecodedImage>,
        config: &InferenceConfig,
    ) -> SignalResult<SignalReport> {
        let started = Instant::now();
        let entry = self.registry.backend_for_model(config.model)?;
        let backend_name = entry.name().to_string();
        let detections = self.detect(entry.shared(), image.clone(), *config)?;
        let decision = self.engine.decide(&detections);

        let report = SignalReport {
            preset: config.preset,
            backend: backend_name,
            total_detections: detections.len(),
            decision,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        log::info!(
            "{}x{} image via {} ({}): {} vehicles of {} detections -> {} {}s",
            image.width(),
            image.height(),
            report.backend,
            report.preset,
            decision.vehicle_count,
            report.total_detections,
            decision.density,
            decision.signal_seconds
        );
        Ok(report)
    }

    fn detect(
        &self,
        backend: SharedBackend,
        image: Arc<DecodedImage>,
        config: InferenceConfig,
    ) -> SignalResult<DetectionSet> {
        let Some(timeout) = self.detect_timeout else {
            return detect_locked(&backend, &image, &config, None);
        };

        // Waiting for the backend lock counts against the timeout. A worker
        // whose caller already gave up skips the detection once it gets in.
        let abandoned = Arc::new(AtomicBool::new(false));
        let worker_abandoned = abandoned.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let abandoned = Some(worker_abandoned.as_ref());
            let _ = tx.send(detect_locked(&backend, &image, &config, abandoned));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::SeqCst);
                log::warn!("detector exceeded {}ms for {}", timeout.as_millis(), config.preset);
                Err(SignalError::DetectionTimeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SignalError::DetectionFailure(
                "detector worker exited without a result".to_string(),
            )),
        }
    }
}

fn detect_locked(
    backend: &SharedBackend,
    image: &DecodedImage,
    config: &InferenceConfig,
    abandoned: Option<&AtomicBool>,
) -> SignalResult<DetectionSet> {
    let mut guard = lock_backend(backend);
    if abandoned.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
        return Err(SignalError::DetectionTimeout(Duration::ZERO));
    }
    match catch_unwind(AssertUnwindSafe(|| guard.detect(image, config))) {
        Ok(result) => result.map_err(SignalError::detection),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("detector backend panicked: {}", reason);
            Err(SignalError::DetectionFailure(format!(
                "detector panicked: {}",
                reason
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DensityLabel;
    use crate::detect::{synthetic_scene, DetectorBackend, ModelVariant, StubBackend};
    use std::io::Cursor;

    /// Panics on its first call, then behaves.
    struct FlakyBackend {
        panicked: bool,
    }

    impl DetectorBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn supports(&self, _model: ModelVariant) -> bool {
            true
        }

        fn detect(
            &mut self,
            _image: &DecodedImage,
            _config: &InferenceConfig,
        ) -> anyhow::Result<DetectionSet> {
            if !self.panicked {
                self.panicked = true;
                panic!("tensor index out of range");
            }
            Ok(DetectionSet::new(synthetic_scene(4, 1)))
        }
    }

    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn pipeline_with(backend: StubBackend) -> SignalPipeline {
        let mut registry = BackendRegistry::new();
        registry.register(backend);
        SignalPipeline::new(registry)
    }

    #[test]
    fn runs_end_to_end_over_stub() {
        let pipeline = pipeline_with(StubBackend::with_detections(synthetic_scene(12, 3)));
        let report = pipeline.run(&png(), "balanced").unwrap();
        assert_eq!(report.preset, Preset::Balanced);
        assert_eq!(report.backend, "stub");
        assert_eq!(report.total_detections, 15);
        assert_eq!(report.decision.vehicle_count, 12);
        assert_eq!(report.decision.density, DensityLabel::Medium);
        assert_eq!(report.decision.signal_seconds, 60);
    }

    #[test]
    fn empty_scene_is_a_low_decision_not_an_error() {
        let pipeline = pipeline_with(StubBackend::empty());
        let report = pipeline.run(&png(), "fast-low-memory").unwrap();
        assert_eq!(report.decision.vehicle_count, 0);
        assert_eq!(report.decision.density, DensityLabel::Low);
        assert_eq!(report.decision.signal_seconds, 30);
    }

    #[test]
    fn unknown_preset_never_reaches_backend() {
        let stub = StubBackend::empty();
        let calls = stub.call_counter();
        let pipeline = pipeline_with(stub);
        let err = pipeline.run(&png(), "ultra").unwrap_err();
        assert!(matches!(err, SignalError::ConfigurationError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_image_never_reaches_backend() {
        let stub = StubBackend::empty();
        let calls = stub.call_counter();
        let pipeline = pipeline_with(stub);
        for bytes in [&b""[..], &b"GIF89a-but-not-really"[..]] {
            let err = pipeline.run(bytes, "balanced").unwrap_err();
            assert!(matches!(err, SignalError::InvalidImage(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backend_failure_is_distinct_from_zero() {
        let pipeline = pipeline_with(StubBackend::failing("cuda device lost"));
        let err = pipeline.run(&png(), "balanced").unwrap_err();
        match err {
            SignalError::DetectionFailure(msg) => assert!(msg.contains("cuda device lost")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_model_variant_is_configuration_error() {
        let pipeline = pipeline_with(StubBackend::empty().serving(&[ModelVariant::Nano]));
        assert!(pipeline.run(&png(), "balanced").is_ok());
        let err = pipeline.run(&png(), "high-recall").unwrap_err();
        assert!(matches!(err, SignalError::ConfigurationError(_)));
    }

    #[test]
    fn slow_backend_times_out_and_next_request_still_works() {
        let pipeline = pipeline_with(
            StubBackend::with_detections(synthetic_scene(3, 0)).with_delay(Duration::from_millis(300)),
        )
        .with_timeout(Some(Duration::from_millis(20)));
        let err = pipeline.run(&png(), "balanced").unwrap_err();
        assert!(matches!(err, SignalError::DetectionTimeout(_)));

        let relaxed = pipeline.with_timeout(Some(Duration::from_secs(5)));
        let report = relaxed.run(&png(), "balanced").unwrap();
        assert_eq!(report.decision.vehicle_count, 3);
    }

    #[test]
    fn hung_backend_does_not_block_later_requests() {
        let stub = StubBackend::empty().with_delay(Duration::from_millis(600));
        let calls = stub.call_counter();
        let pipeline = pipeline_with(stub).with_timeout(Some(Duration::from_millis(50)));

        for _ in 0..2 {
            let started = Instant::now();
            let err = pipeline.run(&png(), "balanced").unwrap_err();
            assert!(matches!(err, SignalError::DetectionTimeout(_)));
            assert!(
                started.elapsed() < Duration::from_millis(400),
                "request took {:?}",
                started.elapsed()
            );
        }

        // The queued worker gives up once it gets the lock.
        std::thread::sleep(Duration::from_millis(900));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_backend_fails_only_that_request() {
        for timeout in [None, Some(Duration::from_secs(5))] {
            let mut registry = BackendRegistry::new();
            registry.register(FlakyBackend { panicked: false });
            let pipeline = SignalPipeline::new(registry).with_timeout(timeout);

            match pipeline.run(&png(), "balanced").unwrap_err() {
                SignalError::DetectionFailure(msg) => {
                    assert!(msg.contains("tensor index out of range"), "{}", msg)
                }
                other => panic!("unexpected error: {:?}", other),
            }
            for _ in 0..3 {
                let report = pipeline.run(&png(), "balanced").unwrap();
                assert_eq!(report.decision.vehicle_count, 4);
            }
        }
    }

    #[test]
    fn decision_is_independent_of_preset() {
        let pipeline = pipeline_with(StubBackend::with_detections(synthetic_scene(26, 4)));
        let decisions: Vec<Decision> = Preset::ALL
            .iter()
            .map(|p| pipeline.run(&png(), p.as_str()).unwrap().decision)
            .collect();
        assert!(decisions.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(decisions[0].density, DensityLabel::High);
    }
}
