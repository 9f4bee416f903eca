//! Semi-supervised circadian phase inference.
//!
//! Learns a linear projection of standardized gene expression onto the unit
//! circle so that the angle of each sample's point is its phase in the
//! circadian cycle. Training combines three signals:
//!
//! - **Reconstruction**: a linear decoder must recover the expression profile
//!   from the 2-D point
//! - **Time supervision**: samples with a known collection time are pulled
//!   toward the matching angle
//! - **Neural sine fitting**: within each celltype, a small network predicts
//!   per-gene sinusoid parameters that must explain expression as a function
//!   of the inferred phase
//!
//! # Architecture
//!
//! - **PhaseDataset / PreparedBatch**: sample matrix, labels, validity mask
//! - **PhaseEncoderDecoder**: `Linear(D→2)` → unit circle → `Linear(2→D)`
//! - **SineParameterPredictor**: `[B, N]` → `(amplitude, phase_offset, baseline)`
//! - **LossAssembler**: weighted sum of the three terms with per-term activity
//! - **PhaseTrainer**: full-batch Adam loop with step-decay schedule
//!
//! # Example
//!
//! ```rust
//! use circadian_phase::geometry::{circular_distance, coords_to_phase};
//!
//! let phase = coords_to_phase(0.0, 1.0);
//! assert!((phase - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
//! assert!((circular_distance(0.1, std::f32::consts::TAU - 0.1) - 0.2).abs() < 1e-5);
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod model;
pub mod nn;
pub mod predictor;
pub mod preprocessing;
pub mod training;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointMetadata, LoadedCheckpoint};
pub use config::PhaseConfig;
pub use data::{CellType, CellTypeGroup, PhaseDataset, PreparedBatch, PADDING_LABEL};
pub use error::{PhaseError, PhaseResult};
pub use inference::{predict_phases, PhasePrediction, PredictionSummary};
pub use model::{PhaseEncoderDecoder, PhaseForward};
pub use predictor::{SineParameterPredictor, SineParams, SinePredictorConfig};
pub use preprocessing::{PreprocessingInfo, ProjectedSample};
pub use training::{
    Adam, AdamConfig, EpochRecord, LossAssembler, LossComponents, LossConfig, PhaseTrainer,
    StepDecay, TrainingConfig, TrainingHistory,
};
