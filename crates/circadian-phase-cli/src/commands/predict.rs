//! Predict command.
//!
//! Loads `model.safetensors` + `checkpoint.json` and writes one JSON document
//! with a summary and per-sample predictions. Datasets given as
//! `raw_samples` are standardized with the checkpoint's preprocessing first.
//!
//! ```bash
//! circadian-phase predict --checkpoint ./model_checkpoints --data test.json --output phases.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use circadian_phase::config::build_device;
use circadian_phase::{load_checkpoint, predict_phases, PhasePrediction, PredictionSummary};

use crate::dataset::PreprocessedDataset;

/// Arguments for the predict command.
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Checkpoint directory written by `train`
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Preprocessed dataset (JSON)
    #[arg(long)]
    pub data: PathBuf,

    /// Output file; predictions go to stdout when omitted
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Device: cpu, cuda or cuda:N
    #[arg(long, default_value = "cpu")]
    pub device: String,
}

#[derive(Serialize)]
struct PredictionReport {
    summary: PredictionSummary,
    predictions: Vec<PhasePrediction>,
}

/// Execute the predict command.
pub fn handle_predict(args: PredictArgs) -> Result<()> {
    let device = build_device(&args.device)?;
    let checkpoint = load_checkpoint(&args.checkpoint, &device)
        .with_context(|| format!("Failed to load checkpoint '{}'", args.checkpoint.display()))?;
    let period_hours = checkpoint.metadata.preprocessing.period_hours;

    let mut data = PreprocessedDataset::load(&args.data)?;
    data.project_raw(&checkpoint.metadata.preprocessing)?;
    let (dataset, preprocessing) = data.into_parts()?;
    if preprocessing.selected_genes != checkpoint.metadata.preprocessing.selected_genes {
        warn!("Dataset gene list differs from the one the checkpoint was trained on");
    }

    let predictions = predict_phases(&checkpoint.model, &dataset, period_hours, &device)?;
    let summary = PredictionSummary::from_predictions(&predictions);
    for line in summary.report().lines() {
        info!("{}", line);
    }

    let json = serde_json::to_string_pretty(&PredictionReport {
        summary,
        predictions,
    })?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write predictions to '{}'", path.display()))?;
            info!("Predictions written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
