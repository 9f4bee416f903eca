//! Root configuration for a training run.
//!
//! # TOML Structure
//!
//! ```toml
//! device = "cpu"
//!
//! [training]
//! epochs = 100
//! seed = 42
//! log_every = 10
//! checkpoint_dir = "checkpoints/circadian"
//!
//! [training.loss]
//! lambda_recon = 1.0
//! lambda_time = 0.5
//! lambda_sine = 0.5
//! period_hours = 24.0
//! min_samples = 5
//!
//! [training.optimizer]
//! learning_rate = 0.001
//!
//! [training.optimizer.schedule]
//! step_size = 500
//! gamma = 0.5
//!
//! [training.predictor]
//! hidden_dim = 64
//! dropout = 0.1
//! ```
//!
//! Every section is optional; missing keys take their documented defaults.

use std::env;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, PhaseResult};
use crate::training::TrainingConfig;

/// Top-level configuration: device selection plus training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// `"cpu"`, `"cuda"` or `"cuda:N"` (default: `"cpu"`).
    pub device: String,
    pub training: TrainingConfig,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            training: TrainingConfig::default(),
        }
    }
}

impl PhaseConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// - `PhaseError::ConfigError` if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> PhaseResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| PhaseError::ConfigError {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        toml::from_str(&contents).map_err(|e| PhaseError::ConfigError {
            message: format!("Failed to parse TOML in '{}': {}", path.display(), e),
        })
    }

    pub fn from_toml_str(toml: &str) -> PhaseResult<Self> {
        toml::from_str(toml).map_err(|e| PhaseError::ConfigError {
            message: format!("Failed to parse TOML: {}", e),
        })
    }

    pub fn to_toml_string(&self) -> PhaseResult<String> {
        toml::to_string_pretty(self).map_err(|e| PhaseError::ConfigError {
            message: format!("Failed to serialize to TOML: {}", e),
        })
    }

    /// Validate all nested configuration, returning the first error found.
    pub fn validate(&self) -> PhaseResult<()> {
        parse_device_name(&self.device)?;
        self.training.validate().map_err(|e| PhaseError::ConfigError {
            message: format!("[training] {}", e),
        })
    }

    /// Apply `CIRCADIAN_*` environment overrides.
    ///
    /// Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = env::var("CIRCADIAN_DEVICE") {
            self.device = val;
        }
        if let Ok(val) = env::var("CIRCADIAN_EPOCHS") {
            if let Ok(n) = val.parse::<usize>() {
                self.training.epochs = n;
            }
        }
        if let Ok(val) = env::var("CIRCADIAN_SEED") {
            if let Ok(n) = val.parse::<u64>() {
                self.training.seed = n;
            }
        }
        if let Ok(val) = env::var("CIRCADIAN_CHECKPOINT_DIR") {
            self.training.checkpoint_dir = PathBuf::from(val);
        }
        self
    }

    /// Instantiate the configured device.
    pub fn build_device(&self) -> PhaseResult<Device> {
        build_device(&self.device)
    }
}

/// Parsed device selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
}

/// Parse `"cpu"`, `"cuda"` or `"cuda:N"`.
pub fn parse_device_name(name: &str) -> PhaseResult<DeviceSpec> {
    let name = name.trim().to_lowercase();
    match name.as_str() {
        "cpu" => Ok(DeviceSpec::Cpu),
        "cuda" | "gpu" => Ok(DeviceSpec::Cuda(0)),
        other => match other.strip_prefix("cuda:") {
            Some(ordinal) => ordinal
                .parse::<usize>()
                .map(DeviceSpec::Cuda)
                .map_err(|_| PhaseError::config(format!("Invalid CUDA ordinal in device '{}'", name))),
            None => Err(PhaseError::config(format!(
                "Unknown device '{}'. Valid: cpu, cuda, cuda:N",
                name
            ))),
        },
    }
}

/// Create a candle device from its name.
pub fn build_device(name: &str) -> PhaseResult<Device> {
    match parse_device_name(name)? {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(|e| PhaseError::ConfigError {
            message: format!("CUDA device {} unavailable: {}", ordinal, e),
        }),
    }
}
