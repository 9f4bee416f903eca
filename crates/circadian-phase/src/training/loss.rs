//! Loss terms for phase training.
//!
//! Three components, each computed every epoch:
//! 1. Reconstruction MSE over valid rows
//! 2. Circular time supervision against known sample times
//! 3. Neural sine fitting per (celltype, gene) pair
//!
//! A term whose labels are absent contributes exactly 0 and is reported
//! as inactive in [`LossComponents`].

use candle_core::{Tensor, D};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::PreparedBatch;
use crate::error::{PhaseError, PhaseResult};
use crate::geometry::{circular_distance_tensor, time_targets};
use crate::model::PhaseForward;
use crate::predictor::SineParameterPredictor;

/// Configuration for the combined loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Weight for reconstruction loss (default: 1.0).
    pub lambda_recon: f32,
    /// Weight for time supervision loss (default: 0.5).
    pub lambda_time: f32,
    /// Weight for sine fitting loss (default: 0.5).
    pub lambda_sine: f32,
    /// Length of one cycle in hours (default: 24).
    pub period_hours: f32,
    /// Minimum group size and minimum non-zero values per gene (default: 5).
    pub min_samples: usize,
    /// Coefficient of the `A² + b²` penalty per pair (default: 0.01).
    pub sine_regularization: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            lambda_recon: 1.0,
            lambda_time: 0.5,
            lambda_sine: 0.5,
            period_hours: 24.0,
            min_samples: 5,
            sine_regularization: 0.01,
        }
    }
}

impl LossConfig {
    pub fn validate(&self) -> PhaseResult<()> {
        for (name, lambda) in [
            ("lambda_recon", self.lambda_recon),
            ("lambda_time", self.lambda_time),
            ("lambda_sine", self.lambda_sine),
            ("sine_regularization", self.sine_regularization),
        ] {
            if !(lambda >= 0.0 && lambda.is_finite()) {
                return Err(PhaseError::config(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, lambda
                )));
            }
        }
        if !(self.period_hours > 0.0 && self.period_hours.is_finite()) {
            return Err(PhaseError::config(format!(
                "period_hours must be positive, got {}",
                self.period_hours
            )));
        }
        if self.min_samples == 0 {
            return Err(PhaseError::config("min_samples must be >= 1"));
        }
        Ok(())
    }
}

/// Per-component loss values for logging and history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossComponents {
    /// Unweighted reconstruction MSE.
    pub reconstruction: f32,
    /// Unweighted mean circular time error (radians).
    pub time: f32,
    /// Unweighted mean per-pair sine loss.
    pub sine: f32,
    /// Weighted total.
    pub total: f32,
    pub reconstruction_active: bool,
    pub time_active: bool,
    pub sine_active: bool,
    /// (celltype, gene) pairs that contributed to the sine term.
    pub sine_pairs: usize,
    /// Pairs whose scoring failed and were excluded.
    pub sine_failures: usize,
    /// Celltype groups below `min_samples`.
    pub sine_skipped_groups: usize,
}

/// Sine-fit term together with its bookkeeping.
pub struct SineFitOutcome {
    /// Mean pair loss, `None` when no pair qualified.
    pub loss: Option<Tensor>,
    pub pairs: usize,
    pub failures: usize,
    pub skipped_groups: usize,
}

/// Combines the three loss terms under one configuration.
pub struct LossAssembler {
    config: LossConfig,
}

impl LossAssembler {
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// MSE between reconstruction and input over valid rows.
    ///
    /// Returns `None` when no row is valid.
    pub fn reconstruction_loss(
        &self,
        forward: &PhaseForward,
        batch: &PreparedBatch,
    ) -> PhaseResult<Option<Tensor>> {
        let Some(valid) = &batch.valid_indices else {
            return Ok(None);
        };
        let predicted = forward
            .reconstruction
            .index_select(valid, 0)
            .map_err(map_candle)?;
        let target = batch.expressions.index_select(valid, 0).map_err(map_candle)?;
        candle_nn::loss::mse(&predicted, &target)
            .map(Some)
            .map_err(map_candle)
    }

    /// Mean circular distance between predicted phases and time-derived targets.
    ///
    /// `phases` holds one predicted angle per row of the batch. Returns `None`
    /// without time labels or when no valid sample has a known time.
    pub fn time_supervision_loss(
        &self,
        phases: &Tensor,
        batch: &PreparedBatch,
    ) -> PhaseResult<Option<Tensor>> {
        let Some(timed) = &batch.timed_indices else {
            return Ok(None);
        };
        let predicted = phases.index_select(timed, 0).map_err(map_candle)?;
        let targets = time_targets(&batch.timed_hours, self.config.period_hours, &batch.device)?;
        circular_distance_tensor(&predicted, &targets)?
            .mean_all()
            .map(Some)
            .map_err(map_candle)
    }

    /// Neural sine fitting over every qualifying (celltype, gene) pair.
    ///
    /// Groups smaller than `min_samples` are skipped, as are genes with fewer
    /// than `min_samples` values in the group. A pair whose scoring fails is
    /// logged, counted and excluded.
    pub fn sine_fit_loss<R: Rng + ?Sized>(
        &self,
        phases: &Tensor,
        batch: &PreparedBatch,
        predictor: &SineParameterPredictor,
        rng: &mut R,
    ) -> PhaseResult<SineFitOutcome> {
        let mut outcome = SineFitOutcome {
            loss: None,
            pairs: 0,
            failures: 0,
            skipped_groups: 0,
        };
        let mut sum: Option<Tensor> = None;

        for (g, group) in batch.groups.iter().enumerate() {
            let members = match &batch.group_indices[g] {
                Some(idx) if group.members.len() >= self.config.min_samples => idx,
                _ => {
                    tracing::debug!(
                        celltype = %group.label,
                        size = group.members.len(),
                        "Skipping celltype group below min_samples"
                    );
                    outcome.skipped_groups += 1;
                    continue;
                }
            };
            let group_phases = phases.index_select(members, 0).map_err(map_candle)?;

            for (gene, values) in batch.group_values[g].iter().enumerate() {
                if values.len() < self.config.min_samples {
                    continue;
                }
                match self.score_pair(&group_phases, values, batch, predictor, rng) {
                    Ok(pair_loss) => {
                        sum = Some(match sum {
                            Some(acc) => acc.add(&pair_loss).map_err(map_candle)?,
                            None => pair_loss,
                        });
                        outcome.pairs += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            celltype = %group.label,
                            gene,
                            error = %e,
                            "Sine fit failed for pair, excluding it"
                        );
                        outcome.failures += 1;
                    }
                }
            }
        }

        if let Some(sum) = sum {
            outcome.loss = Some(
                sum.affine(1.0 / outcome.pairs as f64, 0.0)
                    .map_err(map_candle)?,
            );
        }
        Ok(outcome)
    }

    /// Loss of one (celltype, gene) pair: fit MSE plus amplitude/baseline penalty.
    ///
    /// `values` are the group members' values for the gene, in member order,
    /// aligned with `group_phases`.
    pub fn score_pair<R: Rng + ?Sized>(
        &self,
        group_phases: &Tensor,
        values: &[f32],
        batch: &PreparedBatch,
        predictor: &SineParameterPredictor,
        rng: &mut R,
    ) -> PhaseResult<Tensor> {
        let k = values.len();
        if k > batch.n_samples {
            return Err(PhaseError::dimension("celltype group size", batch.n_samples, k));
        }
        let mut input = vec![0.0f32; batch.n_samples];
        input[..k].copy_from_slice(values);
        let input = Tensor::from_vec(input, (1, batch.n_samples), &batch.device)
            .map_err(map_candle)?;

        let params = predictor.forward_train(&input, rng)?;

        // ŷ = A·sin(phase + φ) + b
        let fitted = group_phases
            .broadcast_add(&params.phase_offset)
            .map_err(map_candle)?
            .sin()
            .map_err(map_candle)?
            .broadcast_mul(&params.amplitude)
            .map_err(map_candle)?
            .broadcast_add(&params.baseline)
            .map_err(map_candle)?;

        let (positions, targets): (Vec<u32>, Vec<f32>) = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, &v)| (i as u32, v))
            .unzip();
        if positions.is_empty() {
            return Err(PhaseError::EmptyInput {
                context: "sine fit pair has no non-zero values".to_string(),
            });
        }
        let n = positions.len();
        let positions = Tensor::from_vec(positions, n, &batch.device).map_err(map_candle)?;
        let targets = Tensor::from_vec(targets, n, &batch.device).map_err(map_candle)?;
        let fitted = fitted.index_select(&positions, 0).map_err(map_candle)?;
        let fit = candle_nn::loss::mse(&fitted, &targets).map_err(map_candle)?;

        let penalty = params
            .amplitude
            .sqr()
            .map_err(map_candle)?
            .add(&params.baseline.sqr().map_err(map_candle)?)
            .map_err(map_candle)?
            .sum_all()
            .map_err(map_candle)?
            .affine(self.config.sine_regularization as f64, 0.0)
            .map_err(map_candle)?;

        let pair_loss = fit.add(&penalty).map_err(map_candle)?;
        let value = tensor_to_f32(&pair_loss)?;
        if !value.is_finite() {
            return Err(PhaseError::NonFiniteLoss {
                context: "sine fit pair".to_string(),
                value,
            });
        }
        Ok(pair_loss)
    }

    /// Compute the weighted total and its components.
    ///
    /// Every term is evaluated even when its weight is 0 so the history
    /// always records it.
    pub fn compute<R: Rng + ?Sized>(
        &self,
        forward: &PhaseForward,
        batch: &PreparedBatch,
        predictor: &SineParameterPredictor,
        rng: &mut R,
    ) -> PhaseResult<(Tensor, LossComponents)> {
        let zero = || Tensor::new(0.0f32, &batch.device).map_err(map_candle);
        let phases = forward.phases()?;

        let recon = self.reconstruction_loss(forward, batch)?;
        let time = self.time_supervision_loss(&phases, batch)?;
        let sine = self.sine_fit_loss(&phases, batch, predictor, rng)?;

        let mut components = LossComponents {
            reconstruction_active: recon.is_some(),
            time_active: time.is_some(),
            sine_active: sine.loss.is_some(),
            sine_pairs: sine.pairs,
            sine_failures: sine.failures,
            sine_skipped_groups: sine.skipped_groups,
            ..Default::default()
        };

        let recon = match recon {
            Some(t) => t,
            None => zero()?,
        };
        let time = match time {
            Some(t) => t,
            None => zero()?,
        };
        let sine = match sine.loss {
            Some(t) => t,
            None => zero()?,
        };

        let total = recon
            .affine(self.config.lambda_recon as f64, 0.0)
            .map_err(map_candle)?
            .add(&time.affine(self.config.lambda_time as f64, 0.0).map_err(map_candle)?)
            .map_err(map_candle)?
            .add(&sine.affine(self.config.lambda_sine as f64, 0.0).map_err(map_candle)?)
            .map_err(map_candle)?;

        components.reconstruction = tensor_to_f32(&recon)?;
        components.time = tensor_to_f32(&time)?;
        components.sine = tensor_to_f32(&sine)?;
        components.total = tensor_to_f32(&total)?;

        Ok((total, components))
    }
}

/// Extract a scalar f32 from a rank-0 or single-element tensor.
fn tensor_to_f32(t: &Tensor) -> PhaseResult<f32> {
    let t = if t.rank() > 0 {
        t.flatten_all().map_err(map_candle)?.sum(D::Minus1).map_err(map_candle)?
    } else {
        t.clone()
    };
    t.to_scalar::<f32>().map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Loss computation error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellType, PhaseDataset};
    use crate::model::PhaseEncoderDecoder;
    use crate::predictor::SinePredictorConfig;
    use candle_core::Device;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rows(n: usize, d: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                (0..d)
                    .map(|j| (i as f32 * 0.7 + j as f32 * 1.3).sin() + 1.5)
                    .collect()
            })
            .collect()
    }

    fn setup(n: usize, d: usize) -> (PhaseEncoderDecoder, SineParameterPredictor) {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let model = PhaseEncoderDecoder::new(d, &mut rng, &Device::Cpu).unwrap();
        let predictor = SineParameterPredictor::new(
            n,
            SinePredictorConfig {
                hidden_dim: 16,
                dropout: 0.0,
            },
            &mut rng,
            &Device::Cpu,
        )
        .unwrap();
        (model, predictor)
    }

    fn components(
        ds: &PhaseDataset,
        model: &PhaseEncoderDecoder,
        predictor: &SineParameterPredictor,
        config: LossConfig,
    ) -> LossComponents {
        let batch = ds.prepare(&Device::Cpu).unwrap();
        let forward = model.forward(&batch.expressions).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        LossAssembler::new(config)
            .compute(&forward, &batch, predictor, &mut rng)
            .unwrap()
            .1
    }

    #[test]
    fn test_absent_labels_give_zero_terms() {
        let (model, predictor) = setup(8, 3);
        let ds = PhaseDataset::padded(rows(6, 3), None, None, 8).unwrap();
        let c = components(&ds, &model, &predictor, LossConfig::default());
        assert!(c.reconstruction_active);
        assert!(c.reconstruction > 0.0);
        assert!(!c.time_active);
        assert_eq!(c.time, 0.0);
        assert!(!c.sine_active);
        assert_eq!(c.sine, 0.0);
        assert_eq!(c.sine_pairs, 0);
        assert!((c.total - c.reconstruction).abs() < 1e-6);
    }

    #[test]
    fn test_padding_rows_do_not_influence_loss() {
        let (model, predictor) = setup(8, 3);
        let labels: Vec<CellType> = (0..8)
            .map(|i| if i < 6 { CellType::known("liver") } else { CellType::Padding })
            .collect();
        let times: Vec<Option<f32>> = (0..8).map(|i| Some(i as f32 * 3.0)).collect();

        let mut clean = rows(6, 3);
        clean.extend(vec![vec![0.0; 3]; 2]);
        let mut noisy = rows(6, 3);
        noisy.extend(vec![vec![50.0, -20.0, 7.0]; 2]);

        let config = LossConfig {
            min_samples: 3,
            ..Default::default()
        };
        let a = PhaseDataset::new(clean, 6, Some(times.clone()), Some(labels.clone())).unwrap();
        let b = PhaseDataset::new(noisy, 6, Some(times), Some(labels)).unwrap();
        let ca = components(&a, &model, &predictor, config.clone());
        let cb = components(&b, &model, &predictor, config);

        assert!(ca.sine_active);
        assert_eq!(ca.sine_pairs, 3);
        assert!((ca.reconstruction - cb.reconstruction).abs() < 1e-6);
        assert!((ca.time - cb.time).abs() < 1e-6);
        assert!((ca.sine - cb.sine).abs() < 1e-5);
    }

    #[test]
    fn test_small_group_excluded_from_pair_count() {
        let d = 4;
        let (model, predictor) = setup(10, d);
        let labels: Vec<CellType> = (0..10)
            .map(|i| if i < 6 { CellType::known("a") } else { CellType::known("b") })
            .collect();

        let ds = PhaseDataset::new(rows(10, d), 10, None, Some(labels)).unwrap();
        let c = components(&ds, &model, &predictor, LossConfig::default());
        assert_eq!(c.sine_pairs, d);
        assert_eq!(c.sine_skipped_groups, 1);
        assert_eq!(c.sine_failures, 0);

        let all = components(
            &ds,
            &model,
            &predictor,
            LossConfig {
                min_samples: 4,
                ..Default::default()
            },
        );
        assert_eq!(all.sine_pairs - c.sine_pairs, d);
    }

    #[test]
    fn test_real_zero_values_keep_gene_qualified() {
        let (model, predictor) = setup(6, 3);
        let mut data = rows(6, 3);
        data[0][1] = 0.0;
        data[4][1] = 0.0;
        for row in data.iter_mut() {
            row[2] = 0.0;
        }
        let ds = PhaseDataset::new(data, 6, None, Some(vec![CellType::known("a"); 6])).unwrap();
        let c = components(&ds, &model, &predictor, LossConfig::default());
        // gene 1 still has six values; gene 2 has nothing to fit
        assert_eq!(c.sine_pairs, 2);
        assert_eq!(c.sine_failures, 1);
        assert!(c.sine_active);
    }

    #[test]
    fn test_failed_pair_is_excluded_not_fatal() {
        let (model, predictor) = setup(6, 2);
        let mut data = rows(6, 2);
        for row in data.iter_mut() {
            row[1] = 3e19;
        }
        let ds = PhaseDataset::new(data, 6, None, Some(vec![CellType::known("a"); 6])).unwrap();
        let batch = ds.prepare(&Device::Cpu).unwrap();
        let phases = model.forward(&batch.expressions).unwrap().phases().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let outcome = LossAssembler::new(LossConfig::default())
            .sine_fit_loss(&phases, &batch, &predictor, &mut rng)
            .unwrap();
        assert_eq!(outcome.pairs, 1);
        assert_eq!(outcome.failures, 1);
        let loss = tensor_to_f32(&outcome.loss.unwrap()).unwrap();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_time_loss_bounded_by_pi() {
        let (model, predictor) = setup(6, 3);
        let times = (0..6).map(|i| Some(i as f32 * 4.0 + 100.0)).collect();
        let ds = PhaseDataset::new(rows(6, 3), 6, Some(times), None).unwrap();
        let c = components(&ds, &model, &predictor, LossConfig::default());
        assert!(c.time_active);
        assert!(c.time >= 0.0 && c.time <= std::f32::consts::PI + 1e-5);
    }

    #[test]
    fn test_config_validation() {
        assert!(LossConfig::default().validate().is_ok());
        let bad = LossConfig {
            lambda_time: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = LossConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
