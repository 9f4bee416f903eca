//! CLI command handlers
//!
//! - `train`: fit a model on a preprocessed dataset
//! - `predict`: run a saved checkpoint on a dataset

pub mod predict;
pub mod train;
