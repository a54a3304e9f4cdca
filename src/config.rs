use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ModelVariant, Preset};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_DETECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SignalConfigFile {
    api: Option<ApiConfigFile>,
    detection: Option<DetectionConfigFile>,
    models: Option<ModelsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    default_preset: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelsConfigFile {
    dir: Option<PathBuf>,
    nano: Option<PathBuf>,
    small: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    pub default_preset: Preset,
    /// `None` disables the detector timeout.
    pub detect_timeout: Option<Duration>,
    pub models: ModelSettings,
}

/// Where model weights live. Explicit paths win over `dir`.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub nano: Option<PathBuf>,
    pub small: Option<PathBuf>,
}

impl ModelSettings {
    pub fn path_for(&self, variant: ModelVariant) -> PathBuf {
        let explicit = match variant {
            ModelVariant::Nano => self.nano.as_ref(),
            ModelVariant::Small => self.small.as_ref(),
        };
        explicit
            .cloned()
            .unwrap_or_else(|| self.dir.join(variant.file_name()))
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        // Defaults cannot fail validation.
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_preset: Preset::default(),
            detect_timeout: Some(Duration::from_millis(DEFAULT_DETECT_TIMEOUT_MS)),
            models: ModelSettings {
                dir: PathBuf::from(DEFAULT_MODEL_DIR),
                nano: None,
                small: None,
            },
        }
    }
}

impl SignalConfig {
    /// Load from `SIGNAL_CONFIG` (JSON, or TOML for `.toml` paths), then env
    /// overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGNAL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SignalConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let models = file.models.unwrap_or_default();

        let default_preset = match detection.default_preset {
            Some(name) => name.parse::<Preset>()?,
            None => defaults.default_preset,
        };
        let detect_timeout = match detection.timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.detect_timeout,
        };
        Ok(Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            default_preset,
            detect_timeout,
            models: ModelSettings {
                dir: models.dir.unwrap_or(defaults.models.dir),
                nano: models.nano,
                small: models.small,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SIGNAL_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(preset) = std::env::var("SIGNAL_DEFAULT_PRESET") {
            if !preset.trim().is_empty() {
                self.default_preset = preset.parse()?;
            }
        }
        if let Ok(dir) = std::env::var("SIGNAL_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.models.dir = PathBuf::from(dir);
            }
        }
        if let Ok(timeout) = std::env::var("SIGNAL_DETECT_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SIGNAL_DETECT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.detect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Ok(limit) = std::env::var("SIGNAL_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("SIGNAL_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.api_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SignalConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_model_path_wins_over_dir() {
        let models = ModelSettings {
            dir: PathBuf::from("/opt/models"),
            nano: None,
            small: Some(PathBuf::from("/srv/weights/custom-s.onnx")),
        };
        assert_eq!(
            models.path_for(ModelVariant::Nano),
            PathBuf::from("/opt/models/yolov8n.onnx")
        );
        assert_eq!(
            models.path_for(ModelVariant::Small),
            PathBuf::from("/srv/weights/custom-s.onnx")
        );
    }

    #[test]
    fn defaults_validate() {
        assert!(SignalConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_in_file_disables_timeout() {
        let file = SignalConfigFile {
            detection: Some(DetectionConfigFile {
                default_preset: Some("high-recall".to_string()),
                timeout_ms: Some(0),
            }),
            ..Default::default()
        };
        let cfg = SignalConfig::from_file(file).unwrap();
        assert_eq!(cfg.detect_timeout, None);
        assert_eq!(cfg.default_preset, Preset::HighRecall);
    }

    #[test]
    fn unknown_preset_in_file_is_rejected() {
        let file = SignalConfigFile {
            detection: Some(DetectionConfigFile {
                default_preset: Some("realtime".to_string()),
                timeout_ms: None,
            }),
            ..Default::default()
        };
        assert!(SignalConfig::from_file(file).is_err());
    }
}
