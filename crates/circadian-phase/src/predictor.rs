//! Sine parameter predictor.
//!
//! Maps one gene's expression across all (padded) samples to the triple
//! `(amplitude, phase_offset, baseline)` of a sinusoid:
//!
//! ```text
//! [B, N] → Linear(N, H) → ReLU → Dropout → Linear(H, H/2) → ReLU → Dropout → Linear(H/2, 3)
//! amplitude    = softplus(raw₀) + 1e-6
//! phase_offset = tanh(raw₁) · π
//! baseline     = raw₂
//! ```
//!
//! The input width is the padded sample count of the training set, not the
//! size of whichever celltype group is being fit.

use std::f64::consts::PI;

use candle_core::{Device, Tensor, Var};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, PhaseResult};
use crate::nn::{Dropout, Linear};

/// Lower bound added to the softplus amplitude.
pub const AMPLITUDE_FLOOR: f64 = 1e-6;

/// Predictor hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinePredictorConfig {
    /// Width of the first hidden layer; the second is half of it (default: 64).
    pub hidden_dim: usize,
    /// Dropout probability after each hidden layer (default: 0.1).
    pub dropout: f32,
}

impl Default for SinePredictorConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            dropout: 0.1,
        }
    }
}

impl SinePredictorConfig {
    pub fn validate(&self) -> PhaseResult<()> {
        if self.hidden_dim < 2 {
            return Err(PhaseError::config(format!(
                "predictor hidden_dim must be >= 2, got {}",
                self.hidden_dim
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PhaseError::config(format!(
                "predictor dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Constrained sinusoid parameters, each of shape [B].
pub struct SineParams {
    pub amplitude: Tensor,
    pub phase_offset: Tensor,
    pub baseline: Tensor,
}

/// Feed-forward network predicting per-gene sinusoid parameters.
pub struct SineParameterPredictor {
    layers: [Linear; 3],
    dropout: Dropout,
    input_dim: usize,
    config: SinePredictorConfig,
}

impl SineParameterPredictor {
    /// Create a predictor whose input width is `input_dim` (the padded sample count).
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        config: SinePredictorConfig,
        rng: &mut R,
        device: &Device,
    ) -> PhaseResult<Self> {
        config.validate()?;
        let hidden = config.hidden_dim;
        let layers = [
            Linear::new(input_dim, hidden, rng, device)?,
            Linear::new(hidden, hidden / 2, rng, device)?,
            Linear::new(hidden / 2, 3, rng, device)?,
        ];
        Ok(Self {
            layers,
            dropout: Dropout::new(config.dropout),
            input_dim,
            config,
        })
    }

    /// Rebuild a predictor from stored layers.
    pub fn from_layers(layers: [Linear; 3], config: SinePredictorConfig) -> PhaseResult<Self> {
        if layers[0].out_dim() != layers[1].in_dim() {
            return Err(PhaseError::dimension(
                "predictor layer 1 input",
                layers[0].out_dim(),
                layers[1].in_dim(),
            ));
        }
        if layers[1].out_dim() != layers[2].in_dim() {
            return Err(PhaseError::dimension(
                "predictor layer 2 input",
                layers[1].out_dim(),
                layers[2].in_dim(),
            ));
        }
        if layers[2].out_dim() != 3 {
            return Err(PhaseError::dimension("predictor output width", 3, layers[2].out_dim()));
        }
        let input_dim = layers[0].in_dim();
        Ok(Self {
            dropout: Dropout::new(config.dropout),
            layers,
            input_dim,
            config,
        })
    }

    /// Deterministic forward pass (dropout disabled).
    pub fn forward(&self, genes: &Tensor) -> PhaseResult<SineParams> {
        let raw = self.raw_forward(genes, None::<&mut rand_chacha::ChaCha8Rng>)?;
        shape_outputs(&raw)
    }

    /// Training forward pass with dropout masks drawn from `rng`.
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        genes: &Tensor,
        rng: &mut R,
    ) -> PhaseResult<SineParams> {
        let raw = self.raw_forward(genes, Some(rng))?;
        shape_outputs(&raw)
    }

    fn raw_forward<R: Rng + ?Sized>(
        &self,
        genes: &Tensor,
        mut rng: Option<&mut R>,
    ) -> PhaseResult<Tensor> {
        let (_, width) = genes.dims2().map_err(map_candle)?;
        if width != self.input_dim {
            return Err(PhaseError::dimension(
                "sine predictor input width",
                self.input_dim,
                width,
            ));
        }

        let mut h = genes.clone();
        for layer in &self.layers[..2] {
            h = layer.forward(&h)?.relu().map_err(map_candle)?;
            if let Some(rng) = rng.as_deref_mut() {
                h = self.dropout.forward(&h, rng)?;
            }
        }
        self.layers[2].forward(&h)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn config(&self) -> &SinePredictorConfig {
        &self.config
    }

    pub fn layers(&self) -> &[Linear; 3] {
        &self.layers
    }

    /// Trainable variables for optimizer registration.
    pub fn trainable_vars(&self) -> Vec<&Var> {
        self.layers.iter().flat_map(|l| l.trainable_vars()).collect()
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.num_params()).sum()
    }
}

/// Apply softplus / tanh·π / identity to the three raw output columns.
fn shape_outputs(raw: &Tensor) -> PhaseResult<SineParams> {
    let column = |i: usize| -> PhaseResult<Tensor> {
        raw.narrow(1, i, 1)
            .map_err(map_candle)?
            .squeeze(1)
            .map_err(map_candle)
    };

    let amplitude = softplus(&column(0)?)?
        .affine(1.0, AMPLITUDE_FLOOR)
        .map_err(map_candle)?;
    let phase_offset = column(1)?.tanh().map_err(map_candle)?.affine(PI, 0.0).map_err(map_candle)?;
    let baseline = column(2)?;

    Ok(SineParams {
        amplitude,
        phase_offset,
        baseline,
    })
}

/// Numerically stable `ln(1 + eˣ) = max(x, 0) + ln(1 + e^{-|x|})`.
fn softplus(x: &Tensor) -> PhaseResult<Tensor> {
    let tail = x
        .abs()
        .map_err(map_candle)?
        .neg()
        .map_err(map_candle)?
        .exp()
        .map_err(map_candle)?
        .affine(1.0, 1.0)
        .map_err(map_candle)?
        .log()
        .map_err(map_candle)?;
    x.relu().map_err(map_candle)?.add(&tail).map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Sine predictor error: {}", e),
    }
}
