//! JSON input format shared by `train` and `predict`.
//!
//! ```json
//! {
//!   "expressions": [[0.1, -1.2, 0.4], [0.0, 0.0, 0.0]],
//!   "real_samples": 1,
//!   "times": [6.5, null],
//!   "celltypes": ["hepatocyte", "PADDING"],
//!   "preprocessing": { "selected_genes": ["PER1", "ARNTL", "NR1D1"], ... }
//! }
//! ```
//!
//! For `predict`, samples may instead be given unstandardized as
//! gene → value maps under `raw_samples`; they are projected with the
//! checkpoint's preprocessing record.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use circadian_phase::{CellType, PhaseDataset, PreprocessingInfo};

/// Standardized sample matrix produced by the external preprocessing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessedDataset {
    /// `N × D` matrix, padding rows included.
    #[serde(default)]
    pub expressions: Vec<Vec<f32>>,
    /// Unstandardized samples keyed by gene name.
    #[serde(default)]
    pub raw_samples: Option<Vec<HashMap<String, f32>>>,
    /// Leading rows that hold real samples (default: all rows).
    #[serde(default)]
    pub real_samples: Option<usize>,
    #[serde(default)]
    pub times: Option<Vec<Option<f32>>>,
    /// Celltype per row, `"PADDING"` for padding rows.
    #[serde(default)]
    pub celltypes: Option<Vec<CellType>>,
    #[serde(default)]
    pub preprocessing: Option<PreprocessingInfo>,
}

impl PreprocessedDataset {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset '{}'", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse dataset JSON in '{}'", path.display()))
    }

    /// Replace `raw_samples` with standardized rows in the feature space of `info`.
    pub fn project_raw(&mut self, info: &PreprocessingInfo) -> Result<()> {
        let Some(raw) = self.raw_samples.take() else {
            return Ok(());
        };
        if !self.expressions.is_empty() {
            anyhow::bail!("Dataset has both 'expressions' and 'raw_samples'");
        }
        info.validate().context("Invalid preprocessing metadata")?;

        for (i, sample) in raw.iter().enumerate() {
            let projected = info.project_sample(sample);
            if !projected.missing_genes.is_empty() {
                warn!(
                    sample = i,
                    missing = projected.missing_genes.len(),
                    "Raw sample lacks selected genes; filled with the training mean"
                );
            }
            self.expressions.push(projected.features);
        }
        self.real_samples = None;
        self.preprocessing = Some(info.clone());
        Ok(())
    }

    /// Build the validated dataset and the preprocessing record to store with it.
    pub fn into_parts(self) -> Result<(PhaseDataset, PreprocessingInfo)> {
        if self.raw_samples.is_some() {
            anyhow::bail!("'raw_samples' need a checkpoint's preprocessing; use them with predict");
        }
        let n_samples = self.expressions.len();
        let n_features = self.expressions.first().map(Vec::len).unwrap_or(0);
        let real_samples = self.real_samples.unwrap_or(n_samples);

        let preprocessing = match self.preprocessing {
            Some(info) => {
                info.validate().context("Invalid preprocessing metadata")?;
                if info.n_components != n_features {
                    anyhow::bail!(
                        "Preprocessing describes {} features but the matrix has {}",
                        info.n_components,
                        n_features
                    );
                }
                info
            }
            None => PreprocessingInfo::identity(n_features, n_samples, real_samples),
        };

        let dataset = PhaseDataset::new(self.expressions, real_samples, self.times, self.celltypes)
            .context("Invalid sample matrix")?;
        Ok((dataset, preprocessing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_dataset() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"expressions": [[1.0, 2.0], [0.0, 0.0]], "real_samples": 1,
                "times": [3.0, null], "celltypes": ["a", "PADDING"]}}"#
        )
        .unwrap();

        let (ds, info) = PreprocessedDataset::load(file.path())
            .unwrap()
            .into_parts()
            .unwrap();
        assert_eq!(ds.n_samples(), 2);
        assert_eq!(ds.n_valid(), 1);
        assert_eq!(info.n_components, 2);
        assert_eq!(info.original_samples, 1);
        assert!(ds.celltypes().unwrap()[1].is_padding());
    }

    #[test]
    fn test_feature_count_mismatch_rejected() {
        let data = PreprocessedDataset {
            expressions: vec![vec![1.0, 2.0]],
            raw_samples: None,
            real_samples: None,
            times: None,
            celltypes: None,
            preprocessing: Some(PreprocessingInfo::identity(3, 1, 1)),
        };
        assert!(data.into_parts().is_err());
    }

    #[test]
    fn test_raw_samples_projected_with_checkpoint_scaler() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"raw_samples": [{{"feature_0": 3.0, "feature_1": 1.0}}, {{"feature_1": 5.0}}],
                "times": [2.0, 8.0]}}"#
        )
        .unwrap();

        let mut info = PreprocessingInfo::identity(2, 4, 3);
        info.scaler_mean = vec![1.0, 1.0];
        info.scaler_scale = vec![2.0, 4.0];
        info.period_hours = 12.0;

        let mut data = PreprocessedDataset::load(file.path()).unwrap();
        assert!(data.expressions.is_empty());
        data.project_raw(&info).unwrap();
        assert_eq!(data.expressions, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let (ds, stored) = data.into_parts().unwrap();
        assert_eq!(ds.n_samples(), 2);
        assert_eq!(ds.n_valid(), 2);
        assert_eq!(stored, info);
    }

    #[test]
    fn test_raw_samples_require_projection() {
        let data = PreprocessedDataset {
            expressions: Vec::new(),
            raw_samples: Some(vec![HashMap::new()]),
            real_samples: None,
            times: None,
            celltypes: None,
            preprocessing: None,
        };
        assert!(data.into_parts().is_err());

        let mut both = PreprocessedDataset {
            expressions: vec![vec![0.0, 0.0]],
            raw_samples: Some(vec![HashMap::new()]),
            real_samples: None,
            times: None,
            celltypes: None,
            preprocessing: None,
        };
        assert!(both
            .project_raw(&PreprocessingInfo::identity(2, 1, 1))
            .is_err());
    }
}
