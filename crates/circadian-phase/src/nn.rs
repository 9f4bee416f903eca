//! Trainable building blocks backed by candle `Var`s.
//!
//! Parameters are plain `Var` tensors registered with the crate's Adam
//! optimizer, so gradients from `loss.backward()` land on exactly the
//! tensors the optimizer updates.

use candle_core::{DType, Device, Tensor, Var};
use rand::Rng;

use crate::error::{PhaseError, PhaseResult};

/// Affine layer `y = x Wᵀ + b`.
pub struct Linear {
    /// Weight: [out_dim, in_dim].
    pub weight: Var,
    /// Bias: [out_dim].
    pub bias: Var,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    /// Create a layer with weights and bias drawn from `U(-1/√in, 1/√in)`.
    pub fn new<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        rng: &mut R,
        device: &Device,
    ) -> PhaseResult<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(PhaseError::InvalidValue {
                field: "linear layer".to_string(),
                message: format!("dimensions must be non-zero, got {}x{}", in_dim, out_dim),
            });
        }

        let bound = 1.0 / (in_dim as f32).sqrt();
        let weight_data: Vec<f32> = (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let bias_data: Vec<f32> = (0..out_dim).map(|_| rng.gen_range(-bound..bound)).collect();

        let weight = Tensor::from_vec(weight_data, (out_dim, in_dim), device).map_err(map_candle)?;
        let bias = Tensor::from_vec(bias_data, out_dim, device).map_err(map_candle)?;
        Self::from_tensors(&weight, &bias)
    }

    /// Wrap existing tensors (e.g. loaded from a checkpoint).
    pub fn from_tensors(weight: &Tensor, bias: &Tensor) -> PhaseResult<Self> {
        let (out_dim, in_dim) = weight.dims2().map_err(map_candle)?;
        let bias_len = bias.dims1().map_err(map_candle)?;
        if bias_len != out_dim {
            return Err(PhaseError::dimension("linear bias length", out_dim, bias_len));
        }

        let weight = Var::from_tensor(&weight.to_dtype(DType::F32).map_err(map_candle)?)
            .map_err(map_candle)?;
        let bias =
            Var::from_tensor(&bias.to_dtype(DType::F32).map_err(map_candle)?).map_err(map_candle)?;

        Ok(Self {
            weight,
            bias,
            in_dim,
            out_dim,
        })
    }

    /// Apply the layer to `[batch, in_dim]` input.
    pub fn forward(&self, x: &Tensor) -> PhaseResult<Tensor> {
        let (_, width) = x.dims2().map_err(map_candle)?;
        if width != self.in_dim {
            return Err(PhaseError::dimension("linear layer input width", self.in_dim, width));
        }
        x.matmul(&self.weight.as_tensor().t().map_err(map_candle)?)
            .map_err(map_candle)?
            .broadcast_add(self.bias.as_tensor())
            .map_err(map_candle)
    }

    /// Trainable variables for optimizer registration.
    pub fn trainable_vars(&self) -> Vec<&Var> {
        vec![&self.weight, &self.bias]
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.in_dim * self.out_dim + self.out_dim
    }
}

/// Inverted dropout with masks drawn from the caller's RNG.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    pub fn probability(&self) -> f32 {
        self.p
    }

    /// Zero each element with probability `p` and scale survivors by `1/(1-p)`.
    pub fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> PhaseResult<Tensor> {
        if self.p <= 0.0 {
            return Ok(x.clone());
        }
        let keep_scale = 1.0 / (1.0 - self.p);
        let mask: Vec<f32> = (0..x.elem_count())
            .map(|_| {
                if rng.gen::<f32>() < self.p {
                    0.0
                } else {
                    keep_scale
                }
            })
            .collect();
        let mask = Tensor::from_vec(mask, x.shape(), x.device()).map_err(map_candle)?;
        x.mul(&mask).map_err(map_candle)
    }
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Layer error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_linear_forward_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let layer = Linear::new(5, 3, &mut rng, &Device::Cpu).unwrap();
        let x = Tensor::ones((4, 5), DType::F32, &Device::Cpu).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.dims(), &[4, 3]);
        assert_eq!(layer.num_params(), 18);
        assert_eq!(layer.trainable_vars().len(), 2);
    }

    #[test]
    fn test_linear_rejects_wrong_width() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let layer = Linear::new(5, 3, &mut rng, &Device::Cpu).unwrap();
        let x = Tensor::ones((4, 6), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            layer.forward(&x),
            Err(PhaseError::DimensionMismatch { expected: 5, actual: 6, .. })
        ));
    }

    #[test]
    fn test_linear_init_is_seeded() {
        let a = Linear::new(4, 2, &mut ChaCha8Rng::seed_from_u64(3), &Device::Cpu).unwrap();
        let b = Linear::new(4, 2, &mut ChaCha8Rng::seed_from_u64(3), &Device::Cpu).unwrap();
        let wa: Vec<f32> = a.weight.as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        let wb: Vec<f32> = b.weight.as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(wa, wb);
        let bound = 0.5;
        assert!(wa.iter().all(|w| w.abs() <= bound));
    }

    #[test]
    fn test_dropout_zero_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x = Tensor::ones((2, 8), DType::F32, &Device::Cpu).unwrap();
        let y: Vec<f32> = Dropout::new(0.0)
            .forward(&x, &mut rng)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(y.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_dropout_scales_survivors() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x = Tensor::ones((10, 100), DType::F32, &Device::Cpu).unwrap();
        let y: Vec<f32> = Dropout::new(0.5)
            .forward(&x, &mut rng)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(y.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let dropped = y.iter().filter(|&&v| v == 0.0).count();
        assert!(dropped > 300 && dropped < 700, "dropped {}", dropped);
    }
}
