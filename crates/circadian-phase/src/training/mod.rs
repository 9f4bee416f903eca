//! Training pipeline for the phase model.
//!
//! - [`loss`]: reconstruction, time supervision and sine-fit terms
//! - [`optimizer`]: Adam with step-decay schedule
//! - [`trainer`]: full-batch epoch loop and checkpoint hand-off

pub mod loss;
pub mod optimizer;
pub mod trainer;

pub use loss::{LossAssembler, LossComponents, LossConfig, SineFitOutcome};
pub use optimizer::{Adam, AdamConfig, StepDecay};
pub use trainer::{EpochRecord, PhaseTrainer, TrainingConfig, TrainingHistory};
