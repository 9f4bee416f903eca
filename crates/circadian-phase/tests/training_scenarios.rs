//! End-to-end training behavior on synthetic circadian data.

use std::f32::consts::{PI, TAU};

use candle_core::Device;
use circadian_phase::geometry::{circular_distance, wrap_phase};
use circadian_phase::{
    predict_phases, CellType, LossConfig, PhaseDataset, PhaseTrainer, SinePredictorConfig,
    StepDecay, TrainingConfig,
};

/// Three sinusoidal genes (A=2, offset 0.5, baseline 1) at uniform phases.
fn sinusoid_rows(n: usize) -> (Vec<Vec<f32>>, Vec<f32>) {
    let mut rows = Vec::with_capacity(n);
    let mut times = Vec::with_capacity(n);
    for i in 0..n {
        let theta = i as f32 * TAU / n as f32;
        rows.push(vec![
            2.0 * (theta + 0.5).sin() + 1.0,
            2.0 * (theta + 0.5).cos() + 1.0,
            2.0 * (theta + 0.5 + PI / 4.0).sin() + 1.0,
        ]);
        times.push(theta * 24.0 / TAU);
    }
    (rows, times)
}

fn base_config(epochs: usize) -> TrainingConfig {
    let mut config = TrainingConfig {
        epochs,
        seed: 42,
        log_every: 100,
        loss: LossConfig {
            lambda_recon: 0.1,
            lambda_time: 1.0,
            lambda_sine: 0.1,
            ..Default::default()
        },
        predictor: SinePredictorConfig {
            hidden_dim: 16,
            dropout: 0.0,
        },
        ..Default::default()
    };
    config.optimizer.learning_rate = 0.01;
    config.optimizer.schedule = StepDecay {
        step_size: 1000,
        gamma: 0.5,
    };
    config
}

#[test]
fn test_recovers_known_phases() {
    let (rows, times) = sinusoid_rows(8);
    let ds = PhaseDataset::padded(
        rows,
        Some(times.clone()),
        Some(vec![CellType::known("hepatocyte"); 8]),
        10,
    )
    .unwrap();

    let device = Device::Cpu;
    let mut trainer = PhaseTrainer::from_config(3, 10, base_config(1500), &device).unwrap();
    let history = trainer.fit(&ds).unwrap();

    let first = &history.epochs[0].loss;
    let last = &history.last().unwrap().loss;
    assert!(first.sine_active && first.time_active);
    assert_eq!(first.sine_pairs, 3);
    assert!(last.time < first.time, "time loss {} -> {}", first.time, last.time);

    let preds = predict_phases(trainer.model(), &ds, 24.0, &device).unwrap();
    assert_eq!(preds.len(), 8);
    let mean_error: f32 = preds
        .iter()
        .zip(&times)
        .map(|(p, &h)| circular_distance(p.phase_radians, wrap_phase(h * TAU / 24.0)))
        .sum::<f32>()
        / 8.0;
    println!("Mean circular error after training: {:.4} rad", mean_error);
    assert!(mean_error < 0.3, "mean circular error {} should be < 0.3", mean_error);
}

#[test]
fn test_small_celltype_group_excluded() {
    let (rows, _) = sinusoid_rows(10);
    let labels: Vec<CellType> = (0..10)
        .map(|i| if i < 6 { CellType::known("a") } else { CellType::known("b") })
        .collect();
    let ds = PhaseDataset::new(rows, 10, None, Some(labels)).unwrap();

    let pairs_with = |min_samples: usize| {
        let mut config = base_config(1);
        config.loss.min_samples = min_samples;
        let mut trainer = PhaseTrainer::from_config(3, 10, config, &Device::Cpu).unwrap();
        let loss = trainer.fit(&ds).unwrap().epochs[0].loss.clone();
        (loss.sine_pairs, loss.sine_skipped_groups)
    };

    let (strict, skipped) = pairs_with(5);
    let (lenient, none_skipped) = pairs_with(4);
    assert_eq!(strict, 3);
    assert_eq!(skipped, 1);
    assert_eq!(none_skipped, 0);
    assert_eq!(lenient - strict, 3);
}

#[test]
fn test_absent_labels_keep_terms_at_zero() {
    let (rows, _) = sinusoid_rows(8);
    let ds = PhaseDataset::padded(rows, None, None, 10).unwrap();
    let mut trainer = PhaseTrainer::from_config(3, 10, base_config(20), &Device::Cpu).unwrap();
    let history = trainer.fit(&ds).unwrap();
    for record in &history.epochs {
        assert_eq!(record.loss.time, 0.0);
        assert_eq!(record.loss.sine, 0.0);
        assert!(!record.loss.time_active);
        assert!(!record.loss.sine_active);
        assert!(record.loss.reconstruction_active);
    }
    let totals = history.totals();
    assert!(totals.last().unwrap() < &totals[0]);
}

#[test]
fn test_same_seed_same_history() {
    let (rows, times) = sinusoid_rows(8);
    let ds = PhaseDataset::padded(rows, Some(times), Some(vec![CellType::known("a"); 8]), 10)
        .unwrap();
    let mut config = base_config(25);
    config.predictor.dropout = 0.1;

    let run = || {
        let mut trainer = PhaseTrainer::from_config(3, 10, config.clone(), &Device::Cpu).unwrap();
        trainer.fit(&ds).unwrap().clone()
    };
    let a = run();
    let b = run();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.epochs.iter().zip(&b.epochs) {
        assert!(
            (x.loss.total - y.loss.total).abs() <= 1e-6 * x.loss.total.abs().max(1.0),
            "epoch {}: {} vs {}",
            x.epoch,
            x.loss.total,
            y.loss.total
        );
        assert_eq!(x.loss.sine_pairs, y.loss.sine_pairs);
    }
}
