//! Binding the paraboloid to a set of sensor samples.
//!
//! `SurfaceProblem` is the [`ModelFunction`] handed to the least-squares engine:
//! it owns the samples, knows the sensor extent (for bounds) and the nominal
//! in-focus position (for the starting point).

use std::f64::consts::PI;

use tracing::{debug, info, warn};

use crate::domain::{GradientMode, SeedStrategy, SensorPoint};
use crate::error::FitError;
use crate::fit::{
    FitDiagnostics, LeastSquaresSolver, ModelFunction, RejectionConfig, SolverReport,
    fit_with_rejection,
};
use crate::math::fit_quadric;
use crate::models::surface::SensorParaboloid;

/// Upper limit for the angular parameters, just below π.
const ANGLE_MAX: f64 = PI - PI * f64::EPSILON;

/// Scale of the curvature parameter relative to the others.
const CURVATURE_SCALE: f64 = 1e-2;

/// Constants of one surface fit.
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Sensor width in microns.
    pub width_um: f64,
    /// Sensor height in microns.
    pub height_um: f64,
    /// Nominal in-focus focuser position in microns.
    pub in_focus_um: f64,
    /// Pin the paraboloid vertex to the sensor center.
    pub fixed_center: bool,
    pub seed: SeedStrategy,
    pub gradient: GradientMode,
    /// Samples whose focus-curve R² is below this are disabled.
    pub min_r_squared: Option<f64>,
}

impl SurfaceConfig {
    pub fn new(width_um: f64, height_um: f64, in_focus_um: f64) -> Self {
        Self {
            width_um,
            height_um,
            in_focus_um,
            fixed_center: false,
            seed: SeedStrategy::default(),
            gradient: GradientMode::default(),
            min_r_squared: None,
        }
    }

    pub fn validate(&self) -> Result<(), FitError> {
        if !(self.width_um.is_finite() && self.width_um > 0.0) {
            return Err(FitError::InvalidArgument(format!(
                "sensor width must be > 0, got {}",
                self.width_um
            )));
        }
        if !(self.height_um.is_finite() && self.height_um > 0.0) {
            return Err(FitError::InvalidArgument(format!(
                "sensor height must be > 0, got {}",
                self.height_um
            )));
        }
        if !self.in_focus_um.is_finite() {
            return Err(FitError::InvalidArgument(format!(
                "in-focus position must be finite, got {}",
                self.in_focus_um
            )));
        }
        if let Some(min) = self.min_r_squared {
            if !min.is_finite() {
                return Err(FitError::InvalidArgument(format!(
                    "minimum R² must be finite, got {min}"
                )));
            }
        }
        Ok(())
    }
}

/// The paraboloid bound to one sample collection.
#[derive(Debug, Clone)]
pub struct SurfaceProblem {
    points: Vec<SensorPoint>,
    config: SurfaceConfig,
    guess: [f64; 6],
}

impl SurfaceProblem {
    /// Validate the configuration, apply the R² filter and compute the seed.
    pub fn new(mut points: Vec<SensorPoint>, config: SurfaceConfig) -> Result<Self, FitError> {
        config.validate()?;

        if let Some(min) = config.min_r_squared {
            let mut dropped = 0;
            for p in points.iter_mut().filter(|p| p.enabled) {
                if p.r_squared.is_some_and(|r2| r2 < min) {
                    p.enabled = false;
                    dropped += 1;
                }
            }
            if dropped > 0 {
                debug!(dropped, min_r_squared = min, "disabled low-quality samples");
            }
        }

        // The analytic ∂f/∂C is zero at C = 0, so an analytic fit started from
        // the nominal point could never move the curvature.
        let seed = match (config.seed, config.gradient) {
            (SeedStrategy::Nominal, GradientMode::Analytic) => {
                debug!("analytic gradient needs a curved start; using the linear seed");
                SeedStrategy::Linear
            }
            (seed, _) => seed,
        };
        let guess = match seed {
            SeedStrategy::Nominal => nominal_guess(&config),
            SeedStrategy::Linear => linear_guess(&points, &config).unwrap_or_else(|| {
                warn!("linear seed is singular; using the nominal starting point");
                nominal_guess(&config)
            }),
        };

        Ok(Self {
            points,
            config,
            guess,
        })
    }

    /// Same constants and starting point, different sample flags.
    pub fn with_points(&self, points: Vec<SensorPoint>) -> Self {
        Self {
            points,
            config: self.config.clone(),
            guess: self.guess,
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn into_points(self) -> Vec<SensorPoint> {
        self.points
    }
}

fn nominal_guess(config: &SurfaceConfig) -> [f64; 6] {
    [0.0, 0.0, config.in_focus_um, 0.0, 0.0, 0.0]
}

/// Seed from the linearized surface centered on the sensor, each sample
/// weighted by its R² (1 when unknown).
fn linear_guess(points: &[SensorPoint], config: &SurfaceConfig) -> Option<[f64; 6]> {
    let enabled: Vec<&SensorPoint> = points.iter().filter(|p| p.enabled).collect();
    let x: Vec<f64> = enabled.iter().map(|p| p.x).collect();
    let y: Vec<f64> = enabled.iter().map(|p| p.y).collect();
    let z: Vec<f64> = enabled.iter().map(|p| p.focus).collect();
    let w: Vec<f64> = enabled
        .iter()
        .map(|p| p.r_squared.unwrap_or(1.0).clamp(0.0, 1.0))
        .collect();

    let q = fit_quadric(&x, &y, &z, &w)?;
    let theta = q.slope_x.hypot(q.slope_y).atan();
    let mut phi = q.slope_y.atan2(q.slope_x);
    if phi > ANGLE_MAX {
        phi = -PI;
    }
    let c = q.radial.signum() * q.radial.abs().sqrt();

    let guess = [0.0, 0.0, q.intercept, theta, phi, c];
    if !guess.iter().all(|v| v.is_finite()) {
        return None;
    }
    debug!(?guess, fixed_center = config.fixed_center, "linear seed");
    Some(guess)
}

impl ModelFunction for SurfaceProblem {
    type Point = SensorPoint;
    type Params = SensorParaboloid;

    fn points(&self) -> &[SensorPoint] {
        &self.points
    }

    fn input_dim(&self) -> usize {
        2
    }

    fn value(&self, params: &[f64], input: &[f64]) -> f64 {
        as_paraboloid(params).value_at(input[0], input[1])
    }

    fn use_analytic_gradient(&self) -> bool {
        self.config.gradient == GradientMode::Analytic
    }

    fn gradient(&self, params: &[f64], input: &[f64], out: &mut [f64]) -> Result<(), FitError> {
        as_paraboloid(params).gradient_at(input[0], input[1], out);
        Ok(())
    }

    fn initial_guess(&self, guess: &mut [f64]) {
        guess.copy_from_slice(&self.guess);
    }

    fn bounds(&self, lower: &mut [f64], upper: &mut [f64]) {
        let (hw, hh) = if self.config.fixed_center {
            (0.0, 0.0)
        } else {
            (self.config.width_um / 2.0, self.config.height_um / 2.0)
        };

        lower.copy_from_slice(&[-hw, -hh, f64::NEG_INFINITY, 0.0, -PI, f64::NEG_INFINITY]);
        upper.copy_from_slice(&[hw, hh, f64::INFINITY, ANGLE_MAX, ANGLE_MAX, f64::INFINITY]);
    }

    fn scale(&self, scale: &mut [f64]) {
        scale.copy_from_slice(&[1.0, 1.0, 1.0, 1.0, 1.0, CURVATURE_SCALE]);
    }
}

fn as_paraboloid(params: &[f64]) -> SensorParaboloid {
    SensorParaboloid {
        x0: params[0],
        y0: params[1],
        z0: params[2],
        theta: params[3],
        phi: params[4],
        c: params[5],
    }
}

/// A fitted surface together with the samples and diagnostics it came from.
#[derive(Debug, Clone)]
pub struct SurfaceFit {
    pub model: SensorParaboloid,
    pub diagnostics: FitDiagnostics,
    pub report: SolverReport,
    /// Samples with their final enabled flags.
    pub points: Vec<SensorPoint>,
    /// Indices disabled by outlier rejection.
    pub rejected: Vec<usize>,
}

impl SurfaceFit {
    pub fn stars_in_model(&self) -> usize {
        self.diagnostics.enabled_count
    }

    pub fn goodness_of_fit(&self) -> f64 {
        self.diagnostics.goodness_of_fit
    }

    pub fn rms_error_microns(&self) -> f64 {
        self.diagnostics.rms_error
    }

    pub fn converged(&self) -> bool {
        self.report.termination.is_converged()
    }

    /// Residual `observed − model` for every sample (disabled ones included).
    pub fn residuals(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.focus - self.model.value_at(p.x, p.y))
            .collect()
    }
}

/// Fit the surface, optionally clipping outliers (`rounds == 0` disables it).
pub fn fit_surface(
    problem: SurfaceProblem,
    solver: &LeastSquaresSolver,
    rejection: &RejectionConfig,
) -> Result<SurfaceFit, FitError> {
    let template = problem.clone();
    let result = fit_with_rejection(
        problem.into_points(),
        |points| template.with_points(points),
        solver,
        rejection,
    )?;

    let outcome = result.outcome;
    if outcome.converged() {
        info!(
            stars = outcome.diagnostics.enabled_count,
            rms_um = outcome.diagnostics.rms_error,
            gof = outcome.diagnostics.goodness_of_fit,
            iterations = outcome.report.iterations,
            "surface fit converged"
        );
    } else {
        warn!(
            iterations = outcome.report.iterations,
            rms_um = outcome.diagnostics.rms_error,
            "surface fit stopped at the iteration cap"
        );
    }

    Ok(SurfaceFit {
        model: outcome.params,
        diagnostics: outcome.diagnostics,
        report: outcome.report,
        points: result.points,
        rejected: result.rejected,
    })
}
