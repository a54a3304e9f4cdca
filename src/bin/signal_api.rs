//! signal_api - HTTP service for green-time decisions
//!
//! This daemon:
//! 1. Loads configuration (SIGNAL_CONFIG + env overrides)
//! 2. Loads detector weights once and keeps them for the process lifetime
//! 3. Serves POST /decide until Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc};

use signal_kernel::api::{ApiConfig, ApiServer};
use signal_kernel::config::SignalConfig;
use signal_kernel::detect::load_model_backends;
use signal_kernel::SignalPipeline;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SignalConfig::load()?;
    let registry = load_model_backends(&config.models)?;
    registry.warm_up_all()?;
    log::info!("detector backends ready: {}", registry.list().join(", "));

    let pipeline = Arc::new(SignalPipeline::new(registry).with_timeout(config.detect_timeout));
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_upload_bytes: config.max_upload_bytes,
        default_preset: config.default_preset,
    };
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
    log::info!(
        "signal api listening on {} (default preset {})",
        api_handle.addr,
        config.default_preset
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("signal_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
