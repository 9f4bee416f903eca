//! Circular geometry on the phase circle.
//!
//! Scalar helpers convert between unit-circle points, phase angles in
//! `[0, 2π)`, wall-clock hours and degrees. The tensor helpers at the bottom
//! are the differentiable versions the loss terms use.

use std::f32::consts::{PI, TAU};

use candle_core::{Device, Tensor};

use crate::error::{PhaseError, PhaseResult};

/// Phase angle of a 2-D point, in `[0, 2π)`.
pub fn coords_to_phase(x: f32, y: f32) -> f32 {
    let angle = y.atan2(x);
    let angle = if angle < 0.0 { angle + TAU } else { angle };
    // atan2 of a tiny negative y can round up to exactly 2π after the shift
    if angle >= TAU {
        0.0
    } else {
        angle
    }
}

/// Unit-circle point `(cos θ, sin θ)` for a phase angle.
pub fn phase_to_coords(angle: f32) -> (f32, f32) {
    (angle.cos(), angle.sin())
}

/// Target phase for a wall-clock time. Not wrapped into `[0, 2π)`.
pub fn time_to_phase(time_hours: f32, period_hours: f32) -> f32 {
    TAU * time_hours / period_hours
}

/// Wrap any angle into `[0, 2π)`.
pub fn wrap_phase(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Shortest angular separation between two phases, in `[0, π]` for wrapped inputs.
pub fn circular_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs();
    d.min(TAU - d)
}

/// Signed error `predicted - target` wrapped into `(-π, π]`.
pub fn signed_circular_error(predicted: f32, target: f32) -> f32 {
    let diff = wrap_phase(predicted - target);
    if diff > PI {
        diff - TAU
    } else {
        diff
    }
}

/// Hours of the period corresponding to a phase angle.
pub fn phase_to_hours(angle: f32, period_hours: f32) -> f32 {
    angle * period_hours / TAU
}

/// Phase angle in degrees.
pub fn phase_to_degrees(angle: f32) -> f32 {
    angle.to_degrees()
}

/// Differentiable phase angles for a `[N, 2]` batch of coordinates.
///
/// Values equal [`coords_to_phase`] row by row. Candle has no atan2, so the
/// angle is split into a detached value and a first-order correction
/// `(x₀·y − y₀·x) / (x₀² + y₀²)` that is zero at the current point and whose
/// gradient is exactly the atan2 gradient.
pub fn phase_tensor(coords: &Tensor) -> PhaseResult<Tensor> {
    let (n, two) = coords.dims2().map_err(map_candle)?;
    if two != 2 {
        return Err(PhaseError::dimension("phase coordinate width", 2, two));
    }

    let x = coords.narrow(1, 0, 1).map_err(map_candle)?.squeeze(1).map_err(map_candle)?;
    let y = coords.narrow(1, 1, 1).map_err(map_candle)?.squeeze(1).map_err(map_candle)?;
    let x0 = x.detach();
    let y0 = y.detach();

    let host: Vec<[f32; 2]> = coords
        .to_dtype(candle_core::DType::F32)
        .map_err(map_candle)?
        .to_vec2::<f32>()
        .map_err(map_candle)?
        .into_iter()
        .map(|row| [row[0], row[1]])
        .collect();
    let angles: Vec<f32> = host.iter().map(|p| coords_to_phase(p[0], p[1])).collect();
    let base = Tensor::from_vec(angles, n, coords.device())
        .map_err(map_candle)?
        .to_dtype(coords.dtype())
        .map_err(map_candle)?;

    let radius_sq = (x0.sqr().map_err(map_candle)? + y0.sqr().map_err(map_candle)?)
        .map_err(map_candle)?
        .affine(1.0, 1e-12)
        .map_err(map_candle)?;
    let cross = ((&x0 * &y).map_err(map_candle)? - (&y0 * &x).map_err(map_candle)?)
        .map_err(map_candle)?;
    let correction = cross.div(&radius_sq).map_err(map_candle)?;

    base.add(&correction).map_err(map_candle)
}

/// Element-wise circular distance `min(|a − b|, 2π − |a − b|)`.
pub fn circular_distance_tensor(predicted: &Tensor, target: &Tensor) -> PhaseResult<Tensor> {
    let d = predicted.sub(target).map_err(map_candle)?.abs().map_err(map_candle)?;
    let wrapped = d.affine(-1.0, TAU as f64).map_err(map_candle)?;
    d.minimum(&wrapped).map_err(map_candle)
}

/// Tensor of wrapped target phases for a slice of wall-clock hours.
pub fn time_targets(hours: &[f32], period_hours: f32, device: &Device) -> PhaseResult<Tensor> {
    let phases: Vec<f32> = hours
        .iter()
        .map(|&h| wrap_phase(time_to_phase(h, period_hours)))
        .collect();
    Tensor::from_vec(phases, hours.len(), device).map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> PhaseError {
    PhaseError::TensorError {
        message: format!("Geometry error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Var;

    #[test]
    fn test_coords_to_phase_range() {
        let points = [
            (1.0, 0.0),
            (0.0, 1.0),
            (-1.0, 0.0),
            (0.0, -1.0),
            (-0.3, -0.7),
            (0.5, -1e-9),
            (1e-6, -3.0),
        ];
        for (x, y) in points {
            let p = coords_to_phase(x, y);
            assert!((0.0..TAU).contains(&p), "phase {} out of range for ({}, {})", p, x, y);
        }
        assert!((coords_to_phase(0.0, -1.0) - 1.5 * PI).abs() < 1e-6);
    }

    #[test]
    fn test_phase_coords_inverse() {
        for i in 0..360 {
            let theta = i as f32 * TAU / 360.0;
            let (x, y) = phase_to_coords(theta);
            let back = coords_to_phase(x, y);
            assert!(
                circular_distance(back, theta) < 1e-5,
                "round trip drifted: {} -> {}",
                theta,
                back
            );
        }
    }

    #[test]
    fn test_circular_distance_wraps() {
        let d = circular_distance(0.1, TAU - 0.1);
        assert!((d - 0.2).abs() < 1e-5, "expected 0.2, got {}", d);
        assert_eq!(circular_distance(1.3, 1.3), 0.0);
        assert!((circular_distance(0.0, PI) - PI).abs() < 1e-6);
    }

    #[test]
    fn test_circular_distance_symmetric_and_bounded() {
        for i in 0..50 {
            for j in 0..50 {
                let a = i as f32 * TAU / 50.0;
                let b = j as f32 * TAU / 50.0;
                let ab = circular_distance(a, b);
                assert_eq!(ab, circular_distance(b, a));
                assert!((0.0..=PI + 1e-6).contains(&ab));
            }
        }
    }

    #[test]
    fn test_time_to_phase_not_wrapped() {
        assert!((time_to_phase(6.0, 24.0) - PI / 2.0).abs() < 1e-6);
        assert!(time_to_phase(30.0, 24.0) > TAU);
        assert!((wrap_phase(time_to_phase(30.0, 24.0)) - PI / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_signed_error() {
        assert!((signed_circular_error(0.1, TAU - 0.1) - 0.2).abs() < 1e-5);
        assert!((signed_circular_error(TAU - 0.1, 0.1) + 0.2).abs() < 1e-5);
        assert!((phase_to_hours(PI, 24.0) - 12.0).abs() < 1e-5);
        assert!((phase_to_degrees(PI) - 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_phase_tensor_matches_scalar() {
        let data = [1.0f32, 0.0, 0.0, 1.0, -1.0, 0.0, 0.3, -0.7, -0.2, -0.9];
        let coords = Tensor::from_slice(&data, (5, 2), &Device::Cpu).unwrap();
        let phases: Vec<f32> = phase_tensor(&coords).unwrap().to_vec1().unwrap();
        for (i, p) in phases.iter().enumerate() {
            let expected = coords_to_phase(data[2 * i], data[2 * i + 1]);
            assert!((p - expected).abs() < 1e-6, "row {}: {} vs {}", i, p, expected);
        }
    }

    #[test]
    fn test_phase_tensor_gradient_is_atan2_gradient() {
        let (x, y) = (0.6f32, 0.8f32);
        let var = Var::from_tensor(&Tensor::from_slice(&[x, y], (1, 2), &Device::Cpu).unwrap())
            .unwrap();
        let phase = phase_tensor(var.as_tensor()).unwrap().sum_all().unwrap();
        let grads = phase.backward().unwrap();
        let g: Vec<f32> = grads
            .get(var.as_tensor())
            .expect("coordinate gradient must exist")
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let r2 = x * x + y * y;
        assert!((g[0] - (-y / r2)).abs() < 1e-5, "d/dx = {}", g[0]);
        assert!((g[1] - (x / r2)).abs() < 1e-5, "d/dy = {}", g[1]);
    }

    #[test]
    fn test_circular_distance_tensor() {
        let pred = Tensor::from_slice(&[0.1f32, 3.0, 6.0], 3, &Device::Cpu).unwrap();
        let target = Tensor::from_slice(&[TAU - 0.1, 3.5, 0.2], 3, &Device::Cpu).unwrap();
        let d: Vec<f32> = circular_distance_tensor(&pred, &target).unwrap().to_vec1().unwrap();
        assert!((d[0] - 0.2).abs() < 1e-5);
        assert!((d[1] - 0.5).abs() < 1e-5);
        assert!((d[2] - circular_distance(6.0, 0.2)).abs() < 1e-5);
    }
}
