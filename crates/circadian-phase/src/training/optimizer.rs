//! Adam optimizer for candle `Var` tensors.
//!
//! Implements Adam with:
//! - Per-parameter moment estimates (m, v) with bias correction
//! - Step-decay learning-rate schedule (`lr · γ^⌊step / step_size⌋`)
//! - Optional decoupled weight decay (AdamW when non-zero)
//! - Optional global gradient-norm clipping

use candle_core::{Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, PhaseResult};

/// Adam optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    /// Base learning rate (default: 1e-3).
    pub learning_rate: f64,
    /// First moment exponential decay rate.
    pub beta1: f64,
    /// Second moment exponential decay rate.
    pub beta2: f64,
    /// Numerical stability constant.
    pub epsilon: f64,
    /// Decoupled weight decay coefficient (default: 0, plain Adam).
    pub weight_decay: f64,
    /// Maximum global gradient norm; `None` disables clipping.
    pub max_grad_norm: Option<f64>,
    /// Step-decay schedule.
    pub schedule: StepDecay,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            max_grad_norm: None,
            schedule: StepDecay::default(),
        }
    }
}

impl AdamConfig {
    pub fn validate(&self) -> PhaseResult<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(PhaseError::config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(PhaseError::config(format!("{} must be in [0, 1), got {}", name, beta)));
            }
        }
        if self.weight_decay < 0.0 {
            return Err(PhaseError::config(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        if let Some(norm) = self.max_grad_norm {
            if norm <= 0.0 {
                return Err(PhaseError::config(format!(
                    "max_grad_norm must be positive, got {}",
                    norm
                )));
            }
        }
        self.schedule.validate()
    }
}

/// Multiply the learning rate by `gamma` every `step_size` steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDecay {
    /// Steps between decays (default: 500).
    pub step_size: usize,
    /// Decay factor (default: 0.5).
    pub gamma: f64,
}

impl Default for StepDecay {
    fn default() -> Self {
        Self {
            step_size: 500,
            gamma: 0.5,
        }
    }
}

impl StepDecay {
    /// Learning rate after `completed_steps` scheduler steps.
    pub fn lr_at(&self, base_lr: f64, completed_steps: usize) -> f64 {
        let decays = completed_steps / self.step_size.max(1);
        base_lr * self.gamma.powi(decays as i32)
    }

    pub fn validate(&self) -> PhaseResult<()> {
        if self.step_size == 0 {
            return Err(PhaseError::config("schedule step_size must be > 0"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(PhaseError::config(format!(
                "schedule gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        Ok(())
    }
}

/// A tracked parameter with its moment estimates.
struct TrackedParam {
    /// The trainable variable.
    var: Var,
    /// First moment estimate (mean of gradients).
    m: Tensor,
    /// Second moment estimate (mean of squared gradients).
    v: Tensor,
}

/// Adam optimizer over a flat list of `Var`s.
pub struct Adam {
    config: AdamConfig,
    params: Vec<TrackedParam>,
    /// Completed optimizer steps (bias correction).
    step: usize,
    /// Completed scheduler steps (learning-rate decay).
    schedule_step: usize,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            params: Vec::new(),
            step: 0,
            schedule_step: 0,
        }
    }

    /// Register a trainable parameter.
    pub fn add_param(&mut self, var: Var) -> PhaseResult<()> {
        let tensor = var.as_tensor();
        let m = tensor.zeros_like().map_err(map_candle)?;
        let v = tensor.zeros_like().map_err(map_candle)?;
        self.params.push(TrackedParam { var, m, v });
        Ok(())
    }

    /// Learning rate the next optimizer step will use.
    pub fn current_lr(&self) -> f64 {
        self.config
            .schedule
            .lr_at(self.config.learning_rate, self.schedule_step)
    }

    /// Backpropagate `loss` and update every registered parameter.
    pub fn step(&mut self, loss: &Tensor) -> PhaseResult<()> {
        self.step += 1;
        let t = self.step as i32;
        let lr = self.current_lr();

        let grads = loss.backward().map_err(map_candle)?;

        let clip_scale = match self.config.max_grad_norm {
            Some(max_norm) => {
                let mut total_sq = 0.0f64;
                for param in &self.params {
                    if let Some(grad) = grads.get(param.var.as_tensor()) {
                        let sq_sum: f32 = grad
                            .sqr()
                            .map_err(map_candle)?
                            .sum_all()
                            .map_err(map_candle)?
                            .to_scalar()
                            .map_err(map_candle)?;
                        total_sq += sq_sum as f64;
                    }
                }
                let total_norm = total_sq.sqrt();
                if total_norm > max_norm {
                    max_norm / (total_norm + self.config.epsilon)
                } else {
                    1.0
                }
            }
            None => 1.0,
        };

        let bc1 = 1.0 - self.config.beta1.powi(t);
        let bc2 = 1.0 - self.config.beta2.powi(t);

        for param in &mut self.params {
            let grad = match grads.get(param.var.as_tensor()) {
                Some(g) => g,
                None => continue,
            };
            let grad = if (clip_scale - 1.0).abs() > 1e-12 {
                grad.affine(clip_scale, 0.0).map_err(map_candle)?
            } else {
                grad.clone()
            };

            // m = β1·m + (1 − β1)·g
            param.m = param
                .m
                .affine(self.config.beta1, 0.0)
                .map_err(map_candle)?
                .add(&grad.affine(1.0 - self.config.beta1, 0.0).map_err(map_candle)?)
                .map_err(map_candle)?
                .detach();

            // v = β2·v + (1 − β2)·g²
            param.v = param
                .v
                .affine(self.config.beta2, 0.0)
                .map_err(map_candle)?
                .add(
                    &grad
                        .sqr()
                        .map_err(map_candle)?
                        .affine(1.0 - self.config.beta2, 0.0)
                        .map_err(map_candle)?,
                )
                .map_err(map_candle)?
                .detach();

            let m_hat = param.m.affine(1.0 / bc1, 0.0).map_err(map_candle)?;
            let denom = param
                .v
                .affine(1.0 / bc2, 0.0)
                .map_err(map_candle)?
                .sqrt()
                .map_err(map_candle)?
                .affine(1.0, self.config.epsilon)
                .map_err(map_candle)?;
            let update = m_hat
                .div(&denom)
                .map_err(map_candle)?
                .affine(-lr, 0.0)
                .map_err(map_candle)?;

            let current = param.var.as_tensor().detach();
            let mut new_val = current.add(&update).map_err(map_candle)?;
            if self.config.weight_decay > 0.0 {
                let decay = current
                    .affine(-lr * self.config.weight_decay, 0.0)
                    .map_err(map_candle)?;
                new_val = new_val.add(&decay).map_err(map_candle)?;
            }

            param.var.set(&new_val.detach()).map_err(map_candle)?;
        }

        Ok(())
    }

    /// Advance the learning-rate schedule by one epoch.
    pub fn schedule_step(&mut self) {
        self.schedule_step += 1;
    }

    /// Completed optimizer steps.
    pub fn global_step(&self) -> usize {
        self.step
    }

    /// Number of tracked parameter tensors.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Optimizer error: {}", e),
    }
}
