//! Full-batch training loop for the phase model.
//!
//! Each epoch runs:
//! - Forward: encoder → unit circle → decoder on the whole sample matrix
//! - Loss: reconstruction + time supervision + neural sine fitting
//! - Candle autograd backward pass
//! - Adam step over encoder, decoder and sine predictor parameters
//! - Step-decay learning-rate update
//!
//! The checkpoint is written once, after the last epoch.

use std::path::{Path, PathBuf};

use candle_core::Device;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{save_checkpoint, CheckpointMetadata};
use crate::data::{PhaseDataset, PreparedBatch};
use crate::error::{PhaseError, PhaseResult};
use crate::model::PhaseEncoderDecoder;
use crate::predictor::{SineParameterPredictor, SinePredictorConfig};
use crate::preprocessing::PreprocessingInfo;

use super::loss::{LossAssembler, LossComponents, LossConfig};
use super::optimizer::{Adam, AdamConfig};

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs (default: 100).
    pub epochs: usize,
    /// Random seed for weight init and dropout masks (default: 42).
    pub seed: u64,
    /// Log progress every N epochs (default: 10).
    pub log_every: usize,
    /// Directory the checkpoint is written to.
    pub checkpoint_dir: PathBuf,
    /// Loss weights and sine-fit thresholds.
    pub loss: LossConfig,
    /// Optimizer and learning-rate schedule.
    pub optimizer: AdamConfig,
    /// Sine predictor architecture.
    pub predictor: SinePredictorConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            seed: 42,
            log_every: 10,
            checkpoint_dir: PathBuf::from("checkpoints/circadian"),
            loss: LossConfig::default(),
            optimizer: AdamConfig::default(),
            predictor: SinePredictorConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> PhaseResult<()> {
        if self.epochs == 0 {
            return Err(PhaseError::config("epochs must be > 0"));
        }
        if self.log_every == 0 {
            return Err(PhaseError::config("log_every must be > 0"));
        }
        self.loss.validate()?;
        self.optimizer.validate()?;
        self.predictor.validate()
    }
}

/// Record of one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch number (0-indexed).
    pub epoch: usize,
    /// Learning rate used for this epoch's step.
    pub learning_rate: f64,
    pub loss: LossComponents,
}

/// Loss history accumulated across epochs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Last recorded epoch.
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Weighted total per epoch.
    pub fn totals(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss.total).collect()
    }
}

/// Trainer owning the phase model, the sine predictor and their optimizer.
pub struct PhaseTrainer {
    config: TrainingConfig,
    model: PhaseEncoderDecoder,
    predictor: SineParameterPredictor,
    loss: LossAssembler,
    optimizer: Adam,
    rng: ChaCha8Rng,
    history: TrainingHistory,
    device: Device,
}

impl PhaseTrainer {
    /// Build freshly initialized networks for an `n_samples × n_features` matrix.
    ///
    /// All randomness (initialization, dropout) comes from `config.seed`.
    pub fn from_config(
        n_features: usize,
        n_samples: usize,
        config: TrainingConfig,
        device: &Device,
    ) -> PhaseResult<Self> {
        config.validate()?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let model = PhaseEncoderDecoder::new(n_features, &mut rng, device)?;
        let predictor =
            SineParameterPredictor::new(n_samples, config.predictor.clone(), &mut rng, device)?;

        let mut optimizer = Adam::new(config.optimizer.clone());
        for var in model.trainable_vars() {
            optimizer.add_param(var.clone())?;
        }
        for var in predictor.trainable_vars() {
            optimizer.add_param(var.clone())?;
        }

        tracing::info!(
            "Initialized phase model: {} features, {} samples, {} model params, {} predictor params",
            n_features,
            n_samples,
            model.num_params(),
            predictor.num_params(),
        );

        Ok(Self {
            loss: LossAssembler::new(config.loss.clone()),
            config,
            model,
            predictor,
            optimizer,
            rng,
            history: TrainingHistory::default(),
            device: device.clone(),
        })
    }

    /// Run a single epoch on a prepared batch and record it.
    pub fn train_epoch(&mut self, batch: &PreparedBatch) -> PhaseResult<EpochRecord> {
        let epoch = self.history.len();
        let learning_rate = self.optimizer.current_lr();

        let forward = self.model.forward(&batch.expressions)?;
        let (total, components) =
            self.loss
                .compute(&forward, batch, &self.predictor, &mut self.rng)?;

        if !components.total.is_finite() {
            return Err(PhaseError::NonFiniteLoss {
                context: format!("epoch {} total", epoch),
                value: components.total,
            });
        }

        self.optimizer.step(&total)?;
        self.optimizer.schedule_step();

        let record = EpochRecord {
            epoch,
            learning_rate,
            loss: components,
        };
        self.history.epochs.push(record.clone());
        Ok(record)
    }

    /// Train for `config.epochs` epochs on `dataset`.
    ///
    /// # Errors
    /// - `DimensionMismatch` if the dataset does not match the networks' widths
    ///   (checked before the first epoch)
    pub fn fit(&mut self, dataset: &PhaseDataset) -> PhaseResult<&TrainingHistory> {
        self.check_dataset(dataset)?;
        let batch = dataset.prepare(&self.device)?;

        tracing::info!(
            "Training {} epochs on {} valid of {} samples (time labels: {}, celltype labels: {}, {} groups)",
            self.config.epochs,
            dataset.n_valid(),
            dataset.n_samples(),
            batch.has_time,
            batch.has_celltype,
            batch.groups.len(),
        );

        for _ in 0..self.config.epochs {
            let record = self.train_epoch(&batch)?;
            let last = record.epoch + 1 == self.config.epochs;
            if record.epoch % self.config.log_every == 0 || last {
                let c = &record.loss;
                tracing::info!(
                    "Epoch {}/{}: total={:.4} recon={:.4} time={:.4} sine={:.4} pairs={} lr={:.2e}",
                    record.epoch + 1,
                    self.config.epochs,
                    c.total,
                    c.reconstruction,
                    c.time,
                    c.sine,
                    c.sine_pairs,
                    record.learning_rate,
                );
                if c.sine_failures > 0 {
                    tracing::warn!(
                        "Epoch {}: {} sine pairs failed and were excluded",
                        record.epoch + 1,
                        c.sine_failures
                    );
                }
            }
        }

        Ok(&self.history)
    }

    /// Train and write the checkpoint to `config.checkpoint_dir`.
    pub fn run(
        &mut self,
        dataset: &PhaseDataset,
        preprocessing: &PreprocessingInfo,
    ) -> PhaseResult<PathBuf> {
        self.fit(dataset)?;
        let dir = self.config.checkpoint_dir.clone();
        self.save(&dir, preprocessing)?;
        Ok(dir)
    }

    /// Write model weights and metadata to `dir`.
    ///
    /// The stored preprocessing record takes the period the model was
    /// trained with, whatever `preprocessing.period_hours` says.
    pub fn save(&self, dir: &Path, preprocessing: &PreprocessingInfo) -> PhaseResult<()> {
        let mut preprocessing = preprocessing.clone();
        preprocessing.period_hours = self.config.loss.period_hours;
        let metadata = CheckpointMetadata::new(
            &self.model,
            &self.predictor,
            preprocessing,
            self.history.clone(),
            self.config.clone(),
        );
        save_checkpoint(dir, &self.model, &self.predictor, &metadata)
    }

    fn check_dataset(&self, dataset: &PhaseDataset) -> PhaseResult<()> {
        if dataset.n_features() != self.model.input_dim() {
            return Err(PhaseError::dimension(
                "dataset feature count",
                self.model.input_dim(),
                dataset.n_features(),
            ));
        }
        if dataset.n_samples() != self.predictor.input_dim() {
            return Err(PhaseError::dimension(
                "dataset sample count",
                self.predictor.input_dim(),
                dataset.n_samples(),
            ));
        }
        Ok(())
    }

    pub fn model(&self) -> &PhaseEncoderDecoder {
        &self.model
    }

    pub fn predictor(&self) -> &SineParameterPredictor {
        &self.predictor
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Learning rate the next epoch will use.
    pub fn current_lr(&self) -> f64 {
        self.optimizer.current_lr()
    }
}
