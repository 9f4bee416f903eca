//! Linear phase encoder/decoder.
//!
//! ```text
//! x [N, D] ──encoder──▶ raw [N, 2] ──/ (‖raw‖ + ε)──▶ unit [N, 2] ──decoder──▶ x̂ [N, D]
//! ```
//!
//! Both maps are purely linear; the normalization onto the unit circle is the
//! only nonlinearity, so the angle of `unit` has to carry the phase.

use candle_core::{Device, Tensor, Var};
use rand::Rng;

use crate::error::{PhaseError, PhaseResult};
use crate::geometry::phase_tensor;
use crate::nn::Linear;

/// Added to the raw-coordinate norm before dividing.
pub const NORM_EPSILON: f64 = 1e-8;

/// Output of a full forward pass.
pub struct PhaseForward {
    /// Unit-circle coordinates [N, 2].
    pub unit_coords: Tensor,
    /// Reconstructed expression [N, D].
    pub reconstruction: Tensor,
}

impl PhaseForward {
    /// Phase angles in `[0, 2π)` for every row, differentiable w.r.t. the coordinates.
    pub fn phases(&self) -> PhaseResult<Tensor> {
        phase_tensor(&self.unit_coords)
    }
}

/// Two-stage linear model projecting expression onto the phase circle.
pub struct PhaseEncoderDecoder {
    encoder: Linear,
    decoder: Linear,
    input_dim: usize,
}

impl PhaseEncoderDecoder {
    /// Create a freshly initialized model for `input_dim` features.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, rng: &mut R, device: &Device) -> PhaseResult<Self> {
        let encoder = Linear::new(input_dim, 2, rng, device)?;
        let decoder = Linear::new(2, input_dim, rng, device)?;
        Ok(Self {
            encoder,
            decoder,
            input_dim,
        })
    }

    /// Rebuild a model from stored layers.
    pub fn from_layers(encoder: Linear, decoder: Linear) -> PhaseResult<Self> {
        if encoder.out_dim() != 2 {
            return Err(PhaseError::dimension("encoder output width", 2, encoder.out_dim()));
        }
        if decoder.in_dim() != 2 {
            return Err(PhaseError::dimension("decoder input width", 2, decoder.in_dim()));
        }
        if decoder.out_dim() != encoder.in_dim() {
            return Err(PhaseError::dimension(
                "decoder output width",
                encoder.in_dim(),
                decoder.out_dim(),
            ));
        }
        let input_dim = encoder.in_dim();
        Ok(Self {
            encoder,
            decoder,
            input_dim,
        })
    }

    /// Raw, unnormalized 2-D projection.
    pub fn encode(&self, x: &Tensor) -> PhaseResult<Tensor> {
        self.check_input(x)?;
        self.encoder.forward(x)
    }

    /// Linear map from phase coordinates back to expression space.
    pub fn decode(&self, unit_coords: &Tensor) -> PhaseResult<Tensor> {
        self.decoder.forward(unit_coords)
    }

    /// Project onto the unit circle and reconstruct.
    pub fn forward(&self, x: &Tensor) -> PhaseResult<PhaseForward> {
        let raw = self.encode(x)?;
        let norm = raw
            .sqr()
            .map_err(map_candle)?
            .sum_keepdim(1)
            .map_err(map_candle)?
            .sqrt()
            .map_err(map_candle)?
            .affine(1.0, NORM_EPSILON)
            .map_err(map_candle)?;
        let unit_coords = raw.broadcast_div(&norm).map_err(map_candle)?;
        let reconstruction = self.decode(&unit_coords)?;
        Ok(PhaseForward {
            unit_coords,
            reconstruction,
        })
    }

    /// Number of expression features the encoder expects.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn encoder(&self) -> &Linear {
        &self.encoder
    }

    pub fn decoder(&self) -> &Linear {
        &self.decoder
    }

    /// Trainable variables for optimizer registration.
    pub fn trainable_vars(&self) -> Vec<&Var> {
        let mut vars = self.encoder.trainable_vars();
        vars.extend(self.decoder.trainable_vars());
        vars
    }

    pub fn num_params(&self) -> usize {
        self.encoder.num_params() + self.decoder.num_params()
    }

    fn check_input(&self, x: &Tensor) -> PhaseResult<()> {
        let (_, width) = x.dims2().map_err(map_candle)?;
        if width != self.input_dim {
            return Err(PhaseError::dimension(
                "sample matrix feature width",
                self.input_dim,
                width,
            ));
        }
        Ok(())
    }
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Phase model error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn model(dim: usize) -> PhaseEncoderDecoder {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        PhaseEncoderDecoder::new(dim, &mut rng, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let m = model(6);
        let x = Tensor::ones((4, 6), DType::F32, &Device::Cpu).unwrap();
        let out = m.forward(&x).unwrap();
        assert_eq!(out.unit_coords.dims(), &[4, 2]);
        assert_eq!(out.reconstruction.dims(), &[4, 6]);
        assert_eq!(m.encode(&x).unwrap().dims(), &[4, 2]);
        assert_eq!(m.trainable_vars().len(), 4);
        assert_eq!(m.num_params(), 6 * 2 + 2 + 2 * 6 + 6);
    }

    #[test]
    fn test_unit_norm_including_zero_rows() {
        let m = model(5);
        let mut data: Vec<f32> = (0..8 * 5).map(|i| ((i * 37 % 11) as f32 - 5.0) * 0.4).collect();
        // Two padding rows at the end.
        for v in data.iter_mut().skip(6 * 5) {
            *v = 0.0;
        }
        let x = Tensor::from_vec(data, (8, 5), &Device::Cpu).unwrap();
        let coords: Vec<Vec<f32>> = m.forward(&x).unwrap().unit_coords.to_vec2().unwrap();
        for row in coords {
            let norm = (row[0] * row[0] + row[1] * row[1]).sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "norm {}", norm);
        }
    }

    #[test]
    fn test_zero_raw_is_finite() {
        let device = Device::Cpu;
        let zeros = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
        let encoder = Linear::from_tensors(&zeros, &Tensor::zeros(2, DType::F32, &device).unwrap())
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let decoder = Linear::new(2, 3, &mut rng, &device).unwrap();
        let m = PhaseEncoderDecoder::from_layers(encoder, decoder).unwrap();

        let x = Tensor::ones((1, 3), DType::F32, &device).unwrap();
        let out = m.forward(&x).unwrap();
        let coords: Vec<f32> = out.unit_coords.flatten_all().unwrap().to_vec1().unwrap();
        assert!(coords.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rejects_wrong_feature_width() {
        let m = model(4);
        let x = Tensor::ones((3, 5), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            m.forward(&x),
            Err(PhaseError::DimensionMismatch { expected: 4, actual: 5, .. })
        ));
    }

    #[test]
    fn test_phases_in_range() {
        let m = model(3);
        let x = Tensor::from_vec(
            vec![0.5f32, -1.0, 2.0, -0.3, 0.1, 0.9, 1.5, 1.5, -2.0],
            (3, 3),
            &Device::Cpu,
        )
        .unwrap();
        let phases: Vec<f32> = m.forward(&x).unwrap().phases().unwrap().to_vec1().unwrap();
        assert!(phases.iter().all(|p| (0.0..std::f32::consts::TAU).contains(p)));
    }
}
