//! signal_decide - one-shot green-time decision for a traffic image
//!
//! Reads an image from disk, runs the configured detector under the chosen
//! preset, and prints the vehicle count, density and signal duration.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use signal_kernel::config::SignalConfig;
use signal_kernel::detect::{load_model_backends, synthetic_scene, InferenceConfig};
use signal_kernel::{load_image_file, BackendRegistry, SignalPipeline, StubBackend};

#[derive(Parser, Debug)]
#[command(author, version, about = "Estimate traffic density and green time for one image")]
struct Args {
    /// Image to analyse (JPEG or PNG).
    #[arg(long)]
    image: PathBuf,

    /// Inference preset: fast-low-memory, balanced, or high-recall.
    #[arg(long, env = "SIGNAL_DEFAULT_PRESET")]
    preset: Option<String>,

    /// Skip model inference and pretend the detector found this many cars.
    #[arg(long)]
    stub_vehicles: Option<usize>,

    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = SignalConfig::load()?;

    let preset = args
        .preset
        .as_deref()
        .unwrap_or(config.default_preset.as_str())
        .to_string();
    let inference = InferenceConfig::named(&preset)?;

    let registry = match args.stub_vehicles {
        Some(count) => {
            log::warn!("stub detector in use: reporting {} cars", count);
            let mut registry = BackendRegistry::new();
            registry.register(StubBackend::with_detections(synthetic_scene(count, 0)));
            registry
        }
        None => load_model_backends(&config.models)?,
    };
    let pipeline = SignalPipeline::new(registry).with_timeout(config.detect_timeout);

    let image = load_image_file(&args.image)
        .with_context(|| format!("cannot use {}", args.image.display()))?;
    let report = pipeline
        .run_decoded(Arc::new(image), &inference)
        .map_err(|e| anyhow!("{} ({})", e, e.code()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("vehicles:      {}", report.decision.vehicle_count);
        println!("density:       {}", report.decision.density);
        println!("signal time:   {}s", report.decision.signal_seconds);
        println!("severity:      {}", report.decision.severity);
        println!("preset:        {} via {}", report.preset, report.backend);
    }
    Ok(())
}
