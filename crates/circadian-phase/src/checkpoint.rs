//! Checkpoint persistence.
//!
//! A checkpoint directory holds two files:
//! - `model.safetensors`: encoder, decoder and sine predictor parameters
//! - `checkpoint.json`: dimensions, predictor config, preprocessing metadata,
//!   loss history and the training configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, PhaseResult};
use crate::model::PhaseEncoderDecoder;
use crate::nn::Linear;
use crate::predictor::{SineParameterPredictor, SinePredictorConfig};
use crate::preprocessing::PreprocessingInfo;
use crate::training::{TrainingConfig, TrainingHistory};

/// Weight file name inside a checkpoint directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Metadata file name inside a checkpoint directory.
pub const METADATA_FILE: &str = "checkpoint.json";
/// Bumped when the on-disk layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// JSON side of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    /// Feature count D.
    pub input_dim: usize,
    /// Padded sample count N (predictor input width).
    pub n_samples: usize,
    pub predictor: SinePredictorConfig,
    pub preprocessing: PreprocessingInfo,
    pub history: TrainingHistory,
    pub training: TrainingConfig,
}

impl CheckpointMetadata {
    pub fn new(
        model: &PhaseEncoderDecoder,
        predictor: &SineParameterPredictor,
        preprocessing: PreprocessingInfo,
        history: TrainingHistory,
        training: TrainingConfig,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            input_dim: model.input_dim(),
            n_samples: predictor.input_dim(),
            predictor: predictor.config().clone(),
            preprocessing,
            history,
            training,
        }
    }
}

/// Networks and metadata restored from disk.
pub struct LoadedCheckpoint {
    pub model: PhaseEncoderDecoder,
    pub predictor: SineParameterPredictor,
    pub metadata: CheckpointMetadata,
}

/// Write weights and metadata into `dir`, creating it if needed.
pub fn save_checkpoint(
    dir: &Path,
    model: &PhaseEncoderDecoder,
    predictor: &SineParameterPredictor,
    metadata: &CheckpointMetadata,
) -> PhaseResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let mut named: Vec<(String, &Linear)> = vec![
        ("encoder".to_string(), model.encoder()),
        ("decoder".to_string(), model.decoder()),
    ];
    for (i, layer) in predictor.layers().iter().enumerate() {
        named.push((format!("sine.layers.{}", i), layer));
    }

    let mut tensor_data: Vec<(String, Vec<f32>, Vec<usize>)> = Vec::new();
    for (prefix, layer) in named {
        for (suffix, var) in [("weight", &layer.weight), ("bias", &layer.bias)] {
            let t = var.as_tensor();
            let data: Vec<f32> = t
                .flatten_all()
                .map_err(map_candle)?
                .to_vec1()
                .map_err(map_candle)?;
            tensor_data.push((format!("{}.{}", prefix, suffix), data, t.dims().to_vec()));
        }
    }

    let views: Vec<(String, safetensors::tensor::TensorView<'_>)> = tensor_data
        .iter()
        .map(|(name, data, shape)| {
            let view = safetensors::tensor::TensorView::new(
                safetensors::Dtype::F32,
                shape.clone(),
                bytemuck::cast_slice(data.as_slice()),
            )
            .map_err(|e| PhaseError::SerializationError {
                message: format!("TensorView for '{}' failed: {}", name, e),
            })?;
            Ok((name.clone(), view))
        })
        .collect::<PhaseResult<Vec<_>>>()?;

    let weights_path = dir.join(WEIGHTS_FILE);
    safetensors::tensor::serialize_to_file(
        views.iter().map(|(k, v)| (k.clone(), v.clone())),
        &None::<HashMap<String, String>>,
        &weights_path,
    )
    .map_err(|e| PhaseError::SerializationError {
        message: format!("Failed to write {}: {}", weights_path.display(), e),
    })?;

    let metadata_path = dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata).map_err(|e| PhaseError::SerializationError {
        message: format!("Failed to encode checkpoint metadata: {}", e),
    })?;
    std::fs::write(&metadata_path, json).map_err(|e| io_error(&metadata_path, e))?;

    tracing::info!(
        "Saved checkpoint to {} ({} tensors, {} epochs of history)",
        dir.display(),
        tensor_data.len(),
        metadata.history.len(),
    );
    Ok(())
}

/// Restore networks and metadata from `dir`.
///
/// # Errors
/// - `IoError` if either file cannot be read
/// - `CheckpointError` for missing tensors or shapes that disagree with the metadata
pub fn load_checkpoint(dir: &Path, device: &Device) -> PhaseResult<LoadedCheckpoint> {
    let metadata_path = dir.join(METADATA_FILE);
    let json = std::fs::read_to_string(&metadata_path).map_err(|e| io_error(&metadata_path, e))?;
    let metadata: CheckpointMetadata =
        serde_json::from_str(&json).map_err(|e| PhaseError::SerializationError {
            message: format!("Failed to parse {}: {}", metadata_path.display(), e),
        })?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(PhaseError::CheckpointError {
            message: format!(
                "unsupported format version {} (expected {})",
                metadata.format_version, FORMAT_VERSION
            ),
        });
    }
    metadata
        .preprocessing
        .validate()
        .map_err(as_checkpoint_error)?;

    let weights_path = dir.join(WEIGHTS_FILE);
    let data = std::fs::read(&weights_path).map_err(|e| io_error(&weights_path, e))?;
    let tensors = safetensors::SafeTensors::deserialize(&data).map_err(|e| {
        PhaseError::SerializationError {
            message: format!("Failed to deserialize {}: {}", weights_path.display(), e),
        }
    })?;

    let load_tensor = |name: &str| -> PhaseResult<Tensor> {
        let view = tensors.tensor(name).map_err(|e| PhaseError::CheckpointError {
            message: format!("Missing tensor '{}': {}", name, e),
        })?;
        if view.dtype() != safetensors::Dtype::F32 {
            return Err(PhaseError::CheckpointError {
                message: format!("Tensor '{}' has dtype {:?}, expected F32", name, view.dtype()),
            });
        }
        let shape: Vec<usize> = view.shape().to_vec();
        // The mmap'd buffer is not guaranteed to be 4-byte aligned.
        let float_data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        Tensor::from_vec(float_data, shape, device).map_err(map_candle)
    };
    let load_linear = |prefix: &str| -> PhaseResult<Linear> {
        let weight = load_tensor(&format!("{}.weight", prefix))?;
        let bias = load_tensor(&format!("{}.bias", prefix))?;
        Linear::from_tensors(&weight, &bias).map_err(|e| PhaseError::CheckpointError {
            message: format!("Invalid layer '{}': {}", prefix, e),
        })
    };

    let model = PhaseEncoderDecoder::from_layers(load_linear("encoder")?, load_linear("decoder")?)
        .map_err(as_checkpoint_error)?;
    let predictor = SineParameterPredictor::from_layers(
        [
            load_linear("sine.layers.0")?,
            load_linear("sine.layers.1")?,
            load_linear("sine.layers.2")?,
        ],
        metadata.predictor.clone(),
    )
    .map_err(as_checkpoint_error)?;

    if model.input_dim() != metadata.input_dim {
        return Err(PhaseError::CheckpointError {
            message: format!(
                "encoder expects {} features but metadata records {}",
                model.input_dim(),
                metadata.input_dim
            ),
        });
    }
    if predictor.input_dim() != metadata.n_samples {
        return Err(PhaseError::CheckpointError {
            message: format!(
                "sine predictor expects {} samples but metadata records {}",
                predictor.input_dim(),
                metadata.n_samples
            ),
        });
    }

    tracing::info!(
        "Loaded checkpoint from {}: {} features, {} samples, {} total params",
        dir.display(),
        model.input_dim(),
        predictor.input_dim(),
        model.num_params() + predictor.num_params(),
    );

    Ok(LoadedCheckpoint {
        model,
        predictor,
        metadata,
    })
}

fn as_checkpoint_error(e: PhaseError) -> PhaseError {
    PhaseError::CheckpointError {
        message: e.to_string(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PhaseError {
    PhaseError::IoError {
        path: PathBuf::from(path),
        source,
    }
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Checkpoint error: {}", e),
    }
}
