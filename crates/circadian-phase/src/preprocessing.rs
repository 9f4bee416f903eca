//! Preprocessing metadata carried from training into the checkpoint.
//!
//! Gene selection and standardization happen upstream; this record keeps
//! what is needed to put a future sample into the same feature space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, PhaseResult};

/// Description of how the training SampleMatrix was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingInfo {
    /// Selected genes, in feature-column order.
    pub selected_genes: Vec<String>,
    /// Importance score of each selected gene.
    #[serde(default)]
    pub gene_importance: Vec<f32>,
    /// Standardization mean per selected gene.
    pub scaler_mean: Vec<f32>,
    /// Standardization scale (standard deviation) per selected gene.
    pub scaler_scale: Vec<f32>,
    /// Number of selected features D.
    pub n_components: usize,
    /// Fixed sample count N after truncation/padding.
    pub max_samples: usize,
    /// Sample count of the matrix handed to training.
    pub actual_samples: usize,
    /// Sample count in the source before truncation/padding.
    pub original_samples: usize,
    #[serde(default)]
    pub train_has_time: bool,
    #[serde(default)]
    pub train_has_celltype: bool,
    #[serde(default = "default_period_hours")]
    pub period_hours: f32,
}

fn default_period_hours() -> f32 {
    24.0
}

/// Result of mapping one raw sample into the training feature space.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedSample {
    pub features: Vec<f32>,
    /// Selected genes absent from the raw sample (filled with 0).
    pub missing_genes: Vec<String>,
}

impl PreprocessingInfo {
    /// Metadata for an already-standardized matrix with unnamed features.
    pub fn identity(n_features: usize, n_samples: usize, real_samples: usize) -> Self {
        Self {
            selected_genes: (0..n_features).map(|i| format!("feature_{}", i)).collect(),
            gene_importance: vec![1.0; n_features],
            scaler_mean: vec![0.0; n_features],
            scaler_scale: vec![1.0; n_features],
            n_components: n_features,
            max_samples: n_samples,
            actual_samples: n_samples,
            original_samples: real_samples,
            train_has_time: false,
            train_has_celltype: false,
            period_hours: default_period_hours(),
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> PhaseResult<()> {
        let d = self.n_components;
        for (name, len) in [
            ("selected_genes", self.selected_genes.len()),
            ("scaler_mean", self.scaler_mean.len()),
            ("scaler_scale", self.scaler_scale.len()),
        ] {
            if len != d {
                return Err(PhaseError::dimension(format!("preprocessing {}", name), d, len));
            }
        }
        if !self.gene_importance.is_empty() && self.gene_importance.len() != d {
            return Err(PhaseError::dimension(
                "preprocessing gene_importance",
                d,
                self.gene_importance.len(),
            ));
        }
        if !(self.period_hours > 0.0 && self.period_hours.is_finite()) {
            return Err(PhaseError::config(format!(
                "period_hours must be positive, got {}",
                self.period_hours
            )));
        }
        Ok(())
    }

    /// Standardize a raw sample given as gene → raw value.
    ///
    /// Genes the sample lacks become 0 (the standardized mean) and are
    /// reported in `missing_genes`.
    pub fn project_sample(&self, raw: &HashMap<String, f32>) -> ProjectedSample {
        let mut missing_genes = Vec::new();
        let features = self
            .selected_genes
            .iter()
            .enumerate()
            .map(|(i, gene)| match raw.get(gene) {
                Some(&value) => {
                    let scale = self.scaler_scale[i];
                    // zero-variance genes were left unscaled upstream
                    let scale = if scale == 0.0 { 1.0 } else { scale };
                    (value - self.scaler_mean[i]) / scale
                }
                None => {
                    missing_genes.push(gene.clone());
                    0.0
                }
            })
            .collect();
        ProjectedSample {
            features,
            missing_genes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> PreprocessingInfo {
        PreprocessingInfo {
            selected_genes: vec!["PER1".into(), "ARNTL".into(), "NR1D1".into()],
            gene_importance: vec![3.0, 2.0, 1.0],
            scaler_mean: vec![10.0, 5.0, 0.0],
            scaler_scale: vec![2.0, 0.0, 4.0],
            n_components: 3,
            max_samples: 12,
            actual_samples: 12,
            original_samples: 9,
            train_has_time: true,
            train_has_celltype: false,
            period_hours: 24.0,
        }
    }

    #[test]
    fn test_project_sample() {
        let raw: HashMap<String, f32> =
            [("PER1".to_string(), 14.0), ("ARNTL".to_string(), 7.0), ("OTHER".to_string(), 1.0)]
                .into_iter()
                .collect();
        let projected = info().project_sample(&raw);
        assert_eq!(projected.features, vec![2.0, 2.0, 0.0]);
        assert_eq!(projected.missing_genes, vec!["NR1D1".to_string()]);
    }

    #[test]
    fn test_validate() {
        assert!(info().validate().is_ok());
        let mut bad = info();
        bad.scaler_mean.pop();
        assert!(matches!(bad.validate(), Err(PhaseError::DimensionMismatch { .. })));
        let mut bad = info();
        bad.period_hours = 0.0;
        assert!(bad.validate().is_err());
        assert!(PreprocessingInfo::identity(4, 10, 8).validate().is_ok());
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "selected_genes": ["a"], "scaler_mean": [0.0], "scaler_scale": [1.0],
            "n_components": 1, "max_samples": 4, "actual_samples": 4, "original_samples": 3
        }"#;
        let parsed: PreprocessingInfo = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.period_hours, 24.0);
        assert!(!parsed.train_has_time);
        assert!(parsed.gene_importance.is_empty());
    }
}
