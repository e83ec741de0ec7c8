//! Synthetic star-field samples drawn from a known surface.
//!
//! Stars sit on a jittered grid across the sensor. Each star's best focus is the
//! surface value plus Gaussian measurement noise; a configurable fraction get a
//! gross error on top, mimicking a bad focus curve.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{DatasetStats, SensorGeometry, SensorPoint};
use crate::error::AppError;
use crate::models::SensorParaboloid;

/// Fraction of each cell a star may be displaced from the cell center.
const JITTER: f64 = 0.35;

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub geometry: SensorGeometry,
    pub model: SensorParaboloid,
    pub grid_wide: usize,
    pub grid_high: usize,
    /// Standard deviation of the focus noise, microns.
    pub noise_um: f64,
    /// Probability that a star carries a gross error.
    pub outlier_prob: f64,
    /// Size of the gross error, microns (sign is random).
    pub outlier_um: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub points: Vec<SensorPoint>,
    /// Noise-free surface value at each star.
    pub baseline: Vec<f64>,
    /// Indices of stars that received a gross error.
    pub outliers: Vec<usize>,
    pub stats: DatasetStats,
}

pub fn generate_sample(config: &SynthConfig) -> Result<SampleData, AppError> {
    config
        .geometry
        .validate()
        .map_err(|e| AppError::new(2, format!("Invalid sensor geometry: {e}")))?;
    if config.grid_wide == 0 || config.grid_high == 0 {
        return Err(AppError::new(2, "Star grid must be at least 1x1."));
    }
    if !(config.noise_um.is_finite() && config.noise_um >= 0.0) {
        return Err(AppError::new(2, "Noise must be finite and >= 0."));
    }
    if !(0.0..1.0).contains(&config.outlier_prob) {
        return Err(AppError::new(2, "Outlier probability must be in [0, 1)."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, config.noise_um)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let width = config.geometry.width_um();
    let height = config.geometry.height_um();
    let cell_w = width / config.grid_wide as f64;
    let cell_h = height / config.grid_high as f64;

    let n = config.grid_wide * config.grid_high;
    let mut points = Vec::with_capacity(n);
    let mut baseline = Vec::with_capacity(n);
    let mut outliers = Vec::new();

    for row in 0..config.grid_high {
        for col in 0..config.grid_wide {
            let jx = rng.gen_range(-JITTER..=JITTER);
            let jy = rng.gen_range(-JITTER..=JITTER);
            let x = -width / 2.0 + (col as f64 + 0.5 + jx) * cell_w;
            let y = -height / 2.0 + (row as f64 + 0.5 + jy) * cell_h;

            let truth = config.model.value_at(x, y);
            let mut focus = truth + normal.sample(&mut rng);

            let roll: f64 = rng.r#gen();
            if roll < config.outlier_prob {
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                focus += sign * config.outlier_um;
                outliers.push(points.len());
            }

            let r2 = rng.gen_range(0.85..=0.99);
            baseline.push(truth);
            points.push(SensorPoint::new(x, y, focus).with_r_squared(r2));
        }
    }

    let stats = DatasetStats::from_points(&points)
        .ok_or_else(|| AppError::new(3, "Generated sample is empty."))?;

    Ok(SampleData {
        points,
        baseline,
        outliers,
        stats,
    })
}
