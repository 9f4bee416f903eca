//! Training data: sample matrix, optional labels and the validity mask.
//!
//! The external preprocessing step delivers a fixed-size `N × D` matrix whose
//! trailing rows may be zero padding. `PhaseDataset` validates the shapes once
//! and derives the validity mask; `PreparedBatch` is the device-side view the
//! loss terms read every epoch.

use std::collections::HashMap;
use std::fmt;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, PhaseResult};

/// Serialized sentinel marking padding rows in celltype labels.
pub const PADDING_LABEL: &str = "PADDING";

/// Cell-type membership of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CellType {
    Known(String),
    Padding,
}

impl CellType {
    pub fn known(label: impl Into<String>) -> Self {
        Self::Known(label.into())
    }

    pub fn is_padding(&self) -> bool {
        matches!(self, Self::Padding)
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Known(label) => Some(label),
            Self::Padding => None,
        }
    }
}

impl From<String> for CellType {
    fn from(value: String) -> Self {
        if value == PADDING_LABEL {
            Self::Padding
        } else {
            Self::Known(value)
        }
    }
}

impl From<&str> for CellType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<CellType> for String {
    fn from(value: CellType) -> Self {
        match value {
            CellType::Known(label) => label,
            CellType::Padding => PADDING_LABEL.to_string(),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(label) => f.write_str(label),
            Self::Padding => f.write_str(PADDING_LABEL),
        }
    }
}

/// Samples of one celltype that pass the validity mask, in dataset order.
#[derive(Debug, Clone, PartialEq)]
pub struct CellTypeGroup {
    pub label: String,
    pub members: Vec<usize>,
}

/// Standardized expression matrix plus labels.
#[derive(Debug, Clone)]
pub struct PhaseDataset {
    expressions: Vec<f32>,
    n_samples: usize,
    n_features: usize,
    times: Option<Vec<Option<f32>>>,
    celltypes: Option<Vec<CellType>>,
    validity: Vec<bool>,
}

impl PhaseDataset {
    /// Build a dataset from `rows` whose first `real_samples` rows are real.
    ///
    /// A row is valid when it is among the real samples and, if celltypes are
    /// given, is not labeled [`CellType::Padding`].
    ///
    /// # Errors
    /// - `EmptyInput` if there are no rows or no features
    /// - `DimensionMismatch` for ragged rows or label vectors of the wrong length
    pub fn new(
        rows: Vec<Vec<f32>>,
        real_samples: usize,
        times: Option<Vec<Option<f32>>>,
        celltypes: Option<Vec<CellType>>,
    ) -> PhaseResult<Self> {
        let n_samples = rows.len();
        if n_samples == 0 {
            return Err(PhaseError::EmptyInput {
                context: "sample matrix has no rows".to_string(),
            });
        }
        let n_features = rows[0].len();
        if n_features == 0 {
            return Err(PhaseError::EmptyInput {
                context: "sample matrix has no feature columns".to_string(),
            });
        }
        if real_samples > n_samples {
            return Err(PhaseError::InvalidValue {
                field: "real_samples".to_string(),
                message: format!("{} exceeds the {} rows provided", real_samples, n_samples),
            });
        }

        let mut expressions = Vec::with_capacity(n_samples * n_features);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_features {
                return Err(PhaseError::dimension(
                    format!("sample matrix row {} width", i),
                    n_features,
                    row.len(),
                ));
            }
            if let Some(bad) = row.iter().find(|v| !v.is_finite()) {
                return Err(PhaseError::InvalidValue {
                    field: format!("sample matrix row {}", i),
                    message: format!("non-finite expression value {}", bad),
                });
            }
            expressions.extend(row);
        }

        if let Some(times) = &times {
            if times.len() != n_samples {
                return Err(PhaseError::dimension("time label length", n_samples, times.len()));
            }
        }
        if let Some(celltypes) = &celltypes {
            if celltypes.len() != n_samples {
                return Err(PhaseError::dimension(
                    "celltype label length",
                    n_samples,
                    celltypes.len(),
                ));
            }
        }

        let validity = (0..n_samples)
            .map(|i| {
                i < real_samples
                    && celltypes
                        .as_ref()
                        .map(|c| !c[i].is_padding())
                        .unwrap_or(true)
            })
            .collect();

        Ok(Self {
            expressions,
            n_samples,
            n_features,
            times,
            celltypes,
            validity,
        })
    }

    /// Zero-pad a set of real samples up to `target_samples` rows.
    ///
    /// Padding rows get no time and the [`CellType::Padding`] label.
    pub fn padded(
        rows: Vec<Vec<f32>>,
        times: Option<Vec<f32>>,
        celltypes: Option<Vec<CellType>>,
        target_samples: usize,
    ) -> PhaseResult<Self> {
        let real = rows.len();
        if real > target_samples {
            return Err(PhaseError::InvalidValue {
                field: "target_samples".to_string(),
                message: format!(
                    "{} real samples do not fit in {} rows; truncate before padding",
                    real, target_samples
                ),
            });
        }
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let pad = target_samples - real;

        let mut rows = rows;
        rows.extend(std::iter::repeat(vec![0.0; width]).take(pad));

        let times = times.map(|t| {
            t.into_iter()
                .map(Some)
                .chain(std::iter::repeat(None).take(pad))
                .collect()
        });
        let celltypes = celltypes.map(|c| {
            c.into_iter()
                .chain(std::iter::repeat(CellType::Padding).take(pad))
                .collect()
        });

        Self::new(rows, real, times, celltypes)
    }

    /// Padded sample count N.
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Feature count D.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_valid(&self) -> usize {
        self.validity.iter().filter(|&&v| v).count()
    }

    pub fn validity(&self) -> &[bool] {
        &self.validity
    }

    pub fn is_valid(&self, sample: usize) -> bool {
        self.validity.get(sample).copied().unwrap_or(false)
    }

    pub fn times(&self) -> Option<&[Option<f32>]> {
        self.times.as_deref()
    }

    pub fn celltypes(&self) -> Option<&[CellType]> {
        self.celltypes.as_deref()
    }

    pub fn has_time(&self) -> bool {
        self.times.is_some()
    }

    pub fn has_celltype(&self) -> bool {
        self.celltypes.is_some()
    }

    /// Row `sample` of the matrix.
    pub fn row(&self, sample: usize) -> &[f32] {
        let start = sample * self.n_features;
        &self.expressions[start..start + self.n_features]
    }

    /// Expression value of `gene` in `sample`.
    pub fn value(&self, sample: usize, gene: usize) -> f32 {
        self.expressions[sample * self.n_features + gene]
    }

    /// Valid samples with a known, finite time: `(sample, hours)`.
    pub fn timed_samples(&self) -> Vec<(usize, f32)> {
        let Some(times) = &self.times else {
            return Vec::new();
        };
        times
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match t {
                Some(h) if h.is_finite() && self.validity[i] => Some((i, *h)),
                _ => None,
            })
            .collect()
    }

    /// Celltype groups over valid samples, in order of first appearance.
    pub fn celltype_groups(&self) -> Vec<CellTypeGroup> {
        let Some(celltypes) = &self.celltypes else {
            return Vec::new();
        };
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<CellTypeGroup> = Vec::new();
        for (i, celltype) in celltypes.iter().enumerate() {
            let CellType::Known(label) = celltype else {
                continue;
            };
            if !self.validity[i] {
                continue;
            }
            let slot = *index.entry(label.as_str()).or_insert_with(|| {
                groups.push(CellTypeGroup {
                    label: label.clone(),
                    members: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].members.push(i);
        }
        groups
    }

    /// Whole matrix as an `[N, D]` tensor.
    pub fn expression_tensor(&self, device: &Device) -> PhaseResult<Tensor> {
        Tensor::from_slice(&self.expressions, (self.n_samples, self.n_features), device)
            .map_err(map_candle)
    }

    /// Move everything the loss needs onto `device`.
    pub fn prepare(&self, device: &Device) -> PhaseResult<PreparedBatch> {
        let valid: Vec<u32> = (0..self.n_samples)
            .filter(|&i| self.validity[i])
            .map(|i| i as u32)
            .collect();
        let valid_indices = index_tensor(&valid, device)?;

        let timed = self.timed_samples();
        let timed_indices = index_tensor(
            &timed.iter().map(|(i, _)| *i as u32).collect::<Vec<_>>(),
            device,
        )?;
        let timed_hours: Vec<f32> = timed.iter().map(|(_, h)| *h).collect();

        let groups = self.celltype_groups();
        let group_values = groups
            .iter()
            .map(|g| {
                (0..self.n_features)
                    .map(|gene| g.members.iter().map(|&s| self.value(s, gene)).collect())
                    .collect()
            })
            .collect();
        let group_indices = groups
            .iter()
            .map(|g| {
                index_tensor(
                    &g.members.iter().map(|&i| i as u32).collect::<Vec<_>>(),
                    device,
                )
            })
            .collect::<PhaseResult<Vec<_>>>()?;

        Ok(PreparedBatch {
            expressions: self.expression_tensor(device)?,
            n_samples: self.n_samples,
            n_features: self.n_features,
            valid_indices,
            has_time: self.has_time(),
            timed_indices,
            timed_hours,
            has_celltype: self.has_celltype(),
            groups,
            group_indices,
            group_values,
            device: device.clone(),
        })
    }
}

/// Device-resident view of a [`PhaseDataset`], built once before training.
pub struct PreparedBatch {
    /// Full sample matrix [N, D], padding rows included.
    pub expressions: Tensor,
    pub n_samples: usize,
    pub n_features: usize,
    /// Indices of valid rows, `None` when every row is padding.
    pub valid_indices: Option<Tensor>,
    pub has_time: bool,
    /// Indices of valid rows with a known time.
    pub timed_indices: Option<Tensor>,
    /// Hours for each entry of `timed_indices`.
    pub timed_hours: Vec<f32>,
    pub has_celltype: bool,
    pub groups: Vec<CellTypeGroup>,
    /// Per group, member indices as a tensor (`None` for an empty group).
    pub group_indices: Vec<Option<Tensor>>,
    /// Per group, per gene, the members' expression values in member order.
    pub group_values: Vec<Vec<Vec<f32>>>,
    pub device: Device,
}

fn index_tensor(indices: &[u32], device: &Device) -> PhaseResult<Option<Tensor>> {
    if indices.is_empty() {
        return Ok(None);
    }
    Tensor::from_slice(indices, indices.len(), device)
        .map(Some)
        .map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Dataset error: {}", e),
    }
}
