//! Train command.
//!
//! # Usage
//!
//! ```bash
//! circadian-phase train --data train.json --config circadian.toml --output ./model_checkpoints
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use circadian_phase::{PhaseConfig, PhaseTrainer};

use crate::dataset::PreprocessedDataset;

/// Arguments for the train command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Preprocessed dataset (JSON)
    #[arg(long)]
    pub data: PathBuf,

    /// Configuration file (TOML); defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Checkpoint directory (overrides the config)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Number of epochs (overrides the config)
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Base learning rate (overrides the config)
    #[arg(long)]
    pub lr: Option<f64>,

    /// Random seed (overrides the config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Cycle length in hours (overrides the config)
    #[arg(long)]
    pub period_hours: Option<f32>,

    /// Device: cpu, cuda or cuda:N (overrides the config)
    #[arg(long)]
    pub device: Option<String>,
}

impl TrainArgs {
    /// Resolve file, environment and flag settings, in increasing priority.
    fn resolve_config(&self) -> Result<PhaseConfig> {
        let config = match &self.config {
            Some(path) => PhaseConfig::from_file(path)?,
            None => PhaseConfig::default(),
        };
        let mut config = config.with_env_overrides();

        if let Some(dir) = &self.output {
            config.training.checkpoint_dir = dir.clone();
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(lr) = self.lr {
            config.training.optimizer.learning_rate = lr;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        if let Some(period) = self.period_hours {
            config.training.loss.period_hours = period;
        }
        if let Some(device) = &self.device {
            config.device = device.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Execute the train command.
pub fn handle_train(args: TrainArgs) -> Result<()> {
    let config = args.resolve_config()?;
    let device = config.build_device()?;

    let (dataset, mut preprocessing) = PreprocessedDataset::load(&args.data)?.into_parts()?;
    preprocessing.train_has_time = dataset.has_time();
    preprocessing.train_has_celltype = dataset.has_celltype();
    preprocessing.period_hours = config.training.loss.period_hours;

    info!(
        "Loaded {} samples ({} valid) x {} features from {}",
        dataset.n_samples(),
        dataset.n_valid(),
        dataset.n_features(),
        args.data.display()
    );

    let mut trainer = PhaseTrainer::from_config(
        dataset.n_features(),
        dataset.n_samples(),
        config.training.clone(),
        &device,
    )?;
    let dir = trainer
        .run(&dataset, &preprocessing)
        .context("Training failed")?;

    if let Some(last) = trainer.history().last() {
        info!(
            "Training complete: final total loss {:.4} after {} epochs",
            last.loss.total,
            trainer.history().len()
        );
    }
    info!("Checkpoint written to {}", dir.display());
    Ok(())
}
