//! Phase prediction for trained models.
//!
//! Runs the encoder on every valid sample, converts the unit-circle point to
//! radians, degrees and hours, and scores it against the true time when one
//! is known.

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::data::PhaseDataset;
use crate::error::{PhaseError, PhaseResult};
use crate::geometry::{
    circular_distance, coords_to_phase, phase_to_degrees, phase_to_hours, signed_circular_error,
    time_to_phase, wrap_phase,
};
use crate::model::PhaseEncoderDecoder;

/// Error thresholds, in hours, reported by [`PredictionSummary`].
pub const ACCURACY_THRESHOLDS_HOURS: [f32; 4] = [1.0, 2.0, 3.0, 6.0];

/// Predicted phase of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePrediction {
    /// Row index in the sample matrix.
    pub sample: usize,
    pub x: f32,
    pub y: f32,
    pub phase_radians: f32,
    pub phase_degrees: f32,
    pub phase_hours: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_time_hours: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_phase_radians: Option<f32>,
    /// `predicted − true`, wrapped into `(−π, π]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_error_radians: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_radians: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_hours: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celltype: Option<String>,
}

/// Predict phases for every valid sample of `dataset`.
pub fn predict_phases(
    model: &PhaseEncoderDecoder,
    dataset: &PhaseDataset,
    period_hours: f32,
    device: &Device,
) -> PhaseResult<Vec<PhasePrediction>> {
    if dataset.n_features() != model.input_dim() {
        return Err(PhaseError::dimension(
            "dataset feature count",
            model.input_dim(),
            dataset.n_features(),
        ));
    }

    let expressions = dataset.expression_tensor(device)?;
    let coords: Vec<Vec<f32>> = model
        .forward(&expressions)?
        .unit_coords
        .to_vec2()
        .map_err(map_candle)?;

    let times = dataset.times();
    let celltypes = dataset.celltypes();

    let predictions = coords
        .into_iter()
        .enumerate()
        .filter(|(i, _)| dataset.is_valid(*i))
        .map(|(i, xy)| {
            let (x, y) = (xy[0], xy[1]);
            let phase = coords_to_phase(x, y);
            let true_time = times.and_then(|t| t[i]).filter(|h| h.is_finite());
            let true_phase = true_time.map(|h| wrap_phase(time_to_phase(h, period_hours)));
            let error = true_phase.map(|t| circular_distance(phase, t));
            PhasePrediction {
                sample: i,
                x,
                y,
                phase_radians: phase,
                phase_degrees: phase_to_degrees(phase),
                phase_hours: phase_to_hours(phase, period_hours),
                true_time_hours: true_time,
                true_phase_radians: true_phase,
                signed_error_radians: true_phase.map(|t| signed_circular_error(phase, t)),
                error_radians: error,
                error_hours: error.map(|e| phase_to_hours(e, period_hours)),
                celltype: celltypes.and_then(|c| c[i].label().map(str::to_string)),
            }
        })
        .collect();

    Ok(predictions)
}

/// Fraction of samples whose error is within a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAccuracy {
    pub hours: f32,
    pub fraction: f32,
}

/// Predicted-hour statistics for one celltype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTypeStats {
    pub celltype: String,
    pub count: usize,
    pub mean_hours: f32,
    /// Sample standard deviation; 0 for a single sample.
    pub std_hours: f32,
}

/// Aggregate statistics over a set of predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub count: usize,
    pub min_hours: f32,
    pub max_hours: f32,
    /// Present when at least one prediction has a known true time.
    pub mean_error_hours: Option<f32>,
    pub std_error_hours: Option<f32>,
    pub accuracy: Vec<ThresholdAccuracy>,
    /// Per celltype, in order of first appearance.
    pub celltypes: Vec<CellTypeStats>,
}

impl PredictionSummary {
    pub fn from_predictions(predictions: &[PhasePrediction]) -> Self {
        let hours: Vec<f32> = predictions.iter().map(|p| p.phase_hours).collect();
        let min_hours = hours.iter().copied().fold(f32::INFINITY, f32::min);
        let max_hours = hours.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let errors: Vec<f32> = predictions.iter().filter_map(|p| p.error_hours).collect();
        let (mean_error_hours, std_error_hours, accuracy) = if errors.is_empty() {
            (None, None, Vec::new())
        } else {
            let n = errors.len() as f32;
            let mean = errors.iter().sum::<f32>() / n;
            // population std over the scored samples
            let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f32>() / n;
            let accuracy = ACCURACY_THRESHOLDS_HOURS
                .iter()
                .map(|&t| ThresholdAccuracy {
                    hours: t,
                    fraction: errors.iter().filter(|&&e| e <= t).count() as f32 / n,
                })
                .collect();
            (Some(mean), Some(var.sqrt()), accuracy)
        };

        let mut celltypes: Vec<(String, Vec<f32>)> = Vec::new();
        for p in predictions {
            let Some(label) = &p.celltype else {
                continue;
            };
            match celltypes.iter_mut().find(|(l, _)| l == label) {
                Some((_, hours)) => hours.push(p.phase_hours),
                None => celltypes.push((label.clone(), vec![p.phase_hours])),
            }
        }
        let celltypes = celltypes
            .into_iter()
            .map(|(celltype, hours)| {
                let count = hours.len();
                let mean = hours.iter().sum::<f32>() / count as f32;
                let std = if count > 1 {
                    (hours.iter().map(|h| (h - mean).powi(2)).sum::<f32>() / (count - 1) as f32)
                        .sqrt()
                } else {
                    0.0
                };
                CellTypeStats {
                    celltype,
                    count,
                    mean_hours: mean,
                    std_hours: std,
                }
            })
            .collect();

        Self {
            count: predictions.len(),
            min_hours: if predictions.is_empty() { 0.0 } else { min_hours },
            max_hours: if predictions.is_empty() { 0.0 } else { max_hours },
            mean_error_hours,
            std_error_hours,
            accuracy,
            celltypes,
        }
    }

    /// Multi-line human-readable report.
    pub fn report(&self) -> String {
        let mut lines = vec![
            format!("Predicted samples: {}", self.count),
            format!(
                "Predicted hours range: {:.2} - {:.2}",
                self.min_hours, self.max_hours
            ),
        ];
        if let (Some(mean), Some(std)) = (self.mean_error_hours, self.std_error_hours) {
            lines.push(format!("Mean error: {:.2} ± {:.2} hours", mean, std));
            for a in &self.accuracy {
                lines.push(format!(
                    "Error <= {}h: {:.1}%",
                    a.hours,
                    a.fraction * 100.0
                ));
            }
        }
        for c in &self.celltypes {
            lines.push(format!(
                "{}: mean {:.2}h, std {:.2}h, n={}",
                c.celltype, c.mean_hours, c.std_hours, c.count
            ));
        }
        lines.join("\n")
    }
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Inference error: {}", e),
    }
}
