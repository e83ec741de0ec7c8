//! Outlier exclusion by iterative residual clipping.
//!
//! - fit with all enabled points
//! - estimate a robust residual scale (MAD / 0.6745)
//! - disable points whose |residual| exceeds `k` times that scale
//! - refit on a fresh model function and repeat
//!
//! Points are never removed from the collection, only disabled, so callers can
//! still report them. At least `P + 1` points always stay enabled.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::FitError;
use crate::fit::solver::{FitOutcome, LeastSquaresSolver};
use crate::fit::traits::{DataPoint, ModelFunction, ParameterVector};
use crate::math::median_mut;

/// Smallest robust scale, relative to the largest observed output.
const SIGMA_FLOOR_REL: f64 = 1e-10;

/// Points whose enabled flag can be switched off.
pub trait Switchable: DataPoint + Clone {
    fn set_enabled(&mut self, enabled: bool);
}

/// Clipping options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionConfig {
    /// Clip threshold in robust standard deviations.
    pub k: f64,
    /// Maximum number of clip-and-refit rounds (0 disables rejection).
    pub rounds: usize,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self { k: 3.0, rounds: 2 }
    }
}

/// Final fit together with the point flags it was computed from.
#[derive(Debug, Clone)]
pub struct RejectionOutcome<T, P> {
    pub outcome: FitOutcome<P>,
    /// The collection with rejected points disabled.
    pub points: Vec<T>,
    /// Indices disabled by clipping, in rejection order.
    pub rejected: Vec<usize>,
    /// Refits performed after the initial fit.
    pub refits: usize,
}

/// Fit, clip outliers and refit.
///
/// `build` turns a point collection into a fresh model function; it is called
/// once per fit.
pub fn fit_with_rejection<M, F>(
    points: Vec<M::Point>,
    build: F,
    solver: &LeastSquaresSolver,
    config: &RejectionConfig,
) -> Result<RejectionOutcome<M::Point, M::Params>, FitError>
where
    M: ModelFunction,
    M::Point: Switchable,
    F: Fn(Vec<M::Point>) -> M,
{
    if !(config.k.is_finite() && config.k > 0.0) {
        return Err(FitError::InvalidArgument(format!(
            "rejection threshold must be finite and > 0, got {}",
            config.k
        )));
    }

    let min_enabled = <M::Params as ParameterVector>::LEN + 1;
    let mut model = build(points);
    let mut outcome = solver.solve(&model)?;
    let mut rejected = Vec::new();
    let mut refits = 0;

    for round in 0..config.rounds {
        let params = outcome.params.to_array();
        let residuals: Vec<(usize, f64)> = model
            .points()
            .iter()
            .enumerate()
            .filter(|(_, pt)| pt.is_enabled())
            .map(|(idx, pt)| (idx, pt.to_output() - model.value(&params, &pt.to_input())))
            .collect();

        let mut abs: Vec<f64> = residuals
            .iter()
            .map(|(_, r)| r.abs())
            .filter(|v| v.is_finite())
            .collect();
        let mad = median_mut(&mut abs).unwrap_or(0.0);
        // Exact fits leave residuals at rounding level; never clip those.
        let y_scale = model
            .points()
            .iter()
            .filter(|pt| pt.is_enabled())
            .fold(1.0_f64, |m, pt| m.max(pt.to_output().abs()));
        let sigma = (mad / 0.6745).max(SIGMA_FLOOR_REL * y_scale);
        let cutoff = config.k * sigma;

        let mut outliers: Vec<(usize, f64)> = residuals
            .into_iter()
            .filter(|(_, r)| r.abs() > cutoff)
            .collect();
        outliers.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let enabled = crate::fit::enabled_count(&model);
        let budget = enabled.saturating_sub(min_enabled);
        outliers.truncate(budget);
        if outliers.is_empty() {
            debug!(round, cutoff, "no outliers beyond cutoff");
            break;
        }

        let mut next: Vec<M::Point> = model.points().to_vec();
        for &(idx, r) in &outliers {
            debug!(round, idx, residual = r, cutoff, "rejecting point");
            next[idx].set_enabled(false);
            rejected.push(idx);
        }

        model = build(next);
        outcome = solver.solve(&model)?;
        refits += 1;
    }

    if !rejected.is_empty() {
        info!(
            rejected = rejected.len(),
            refits,
            rms = outcome.diagnostics.rms_error,
            "outlier rejection finished"
        );
    }

    Ok(RejectionOutcome {
        outcome,
        points: model.points().to_vec(),
        rejected,
        refits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Obs {
        x: f64,
        y: f64,
        enabled: bool,
    }

    impl DataPoint for Obs {
        fn to_input(&self) -> Vec<f64> {
            vec![self.x]
        }

        fn to_output(&self) -> f64 {
            self.y
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    impl Switchable for Obs {
        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Line {
        a: f64,
        b: f64,
    }

    impl ParameterVector for Line {
        const LEN: usize = 2;

        fn names() -> &'static [&'static str] {
            &["a", "b"]
        }

        fn to_array(&self) -> Vec<f64> {
            vec![self.a, self.b]
        }

        fn from_array(&mut self, values: &[f64]) -> Result<(), FitError> {
            crate::fit::check_len::<Self>(values)?;
            self.a = values[0];
            self.b = values[1];
            Ok(())
        }
    }

    struct LineProblem(Vec<Obs>);

    impl ModelFunction for LineProblem {
        type Point = Obs;
        type Params = Line;

        fn points(&self) -> &[Obs] {
            &self.0
        }

        fn input_dim(&self) -> usize {
            1
        }

        fn value(&self, params: &[f64], input: &[f64]) -> f64 {
            params[0] + params[1] * input[0]
        }

        fn initial_guess(&self, guess: &mut [f64]) {
            guess.fill(0.0);
        }

        fn bounds(&self, lower: &mut [f64], upper: &mut [f64]) {
            lower.fill(f64::NEG_INFINITY);
            upper.fill(f64::INFINITY);
        }

        fn scale(&self, scale: &mut [f64]) {
            scale.fill(1.0);
        }
    }

    fn noisy_line() -> Vec<Obs> {
        // Deterministic small wiggle so the MAD is non-zero.
        (0..30)
            .map(|i| {
                let x = i as f64;
                let wiggle = if i % 2 == 0 { 0.05 } else { -0.05 };
                Obs {
                    x,
                    y: 2.0 + 0.5 * x + wiggle,
                    enabled: true,
                }
            })
            .collect()
    }

    #[test]
    fn clips_injected_outliers() {
        let mut points = noisy_line();
        points[4].y += 25.0;
        points[17].y -= 30.0;

        let result = fit_with_rejection(
            points,
            LineProblem,
            &LeastSquaresSolver::default(),
            &RejectionConfig::default(),
        )
        .unwrap();

        let mut rejected = result.rejected.clone();
        rejected.sort_unstable();
        assert_eq!(rejected, vec![4, 17]);
        assert!(!result.points[4].enabled && !result.points[17].enabled);
        assert_eq!(result.outcome.diagnostics.enabled_count, 28);
        assert!((result.outcome.params.b - 0.5).abs() < 1e-3);
        assert!((result.outcome.params.a - 2.0).abs() < 1e-2);
    }

    #[test]
    fn clean_data_needs_no_refit() {
        let result = fit_with_rejection(
            noisy_line(),
            LineProblem,
            &LeastSquaresSolver::default(),
            &RejectionConfig::default(),
        )
        .unwrap();
        assert!(result.rejected.is_empty());
        assert_eq!(result.refits, 0);
    }

    #[test]
    fn never_drops_below_minimum_points() {
        let points = vec![
            Obs { x: 0.0, y: 0.0, enabled: true },
            Obs { x: 1.0, y: 1.0, enabled: true },
            Obs { x: 2.0, y: 2.0, enabled: true },
            Obs { x: 3.0, y: 100.0, enabled: true },
        ];
        let config = RejectionConfig { k: 0.1, rounds: 5 };
        let result =
            fit_with_rejection(points, LineProblem, &LeastSquaresSolver::default(), &config).unwrap();
        assert!(result.outcome.diagnostics.enabled_count >= 3);
        assert_eq!(result.rejected.len(), 1);
    }
}
