//! Circadian Phase CLI
//!
//! Train a phase model on a preprocessed expression matrix and predict
//! sample phases with a saved checkpoint.
//!
//! # Commands
//!
//! - `train`: Fit encoder, decoder and sine predictor, then write a checkpoint
//! - `predict`: Load a checkpoint and write per-sample phase predictions
//!
//! Exit code 1 on any error.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod dataset;

/// Circadian Phase - semi-supervised phase inference
#[derive(Parser)]
#[command(name = "circadian-phase")]
#[command(version)]
#[command(about = "Infer circadian phase from gene expression on a learned unit circle")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a phase model and write its checkpoint
    Train(commands::train::TrainArgs),
    /// Predict phases with a trained checkpoint
    Predict(commands::predict::PredictArgs),
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Train(args) => commands::train::handle_train(args),
        Commands::Predict(args) => commands::predict::handle_predict(args),
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
