//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for evaluation

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::fit::{DataPoint, FitDiagnostics, RejectionConfig, SolverConfig, Switchable, Termination};
use crate::models::SensorParaboloid;

/// Physical layout of the sensor and focuser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorGeometry {
    pub width_px: u32,
    pub height_px: u32,
    /// Pixel pitch in microns.
    pub pixel_size_um: f64,
    /// Focuser travel per step in microns.
    pub microns_per_step: f64,
}

impl SensorGeometry {
    pub fn width_um(&self) -> f64 {
        self.width_px as f64 * self.pixel_size_um
    }

    pub fn height_um(&self) -> f64 {
        self.height_px as f64 * self.pixel_size_um
    }

    /// Pixel coordinates (origin top-left) to microns relative to the sensor center.
    pub fn pixel_to_sensor(&self, x_px: f64, y_px: f64) -> (f64, f64) {
        (
            (x_px - self.width_px as f64 / 2.0) * self.pixel_size_um,
            (y_px - self.height_px as f64 / 2.0) * self.pixel_size_um,
        )
    }

    /// Inverse of [`SensorGeometry::pixel_to_sensor`].
    pub fn sensor_to_pixel(&self, x_um: f64, y_um: f64) -> (f64, f64) {
        (
            x_um / self.pixel_size_um + self.width_px as f64 / 2.0,
            y_um / self.pixel_size_um + self.height_px as f64 / 2.0,
        )
    }

    pub fn steps_to_microns(&self, steps: f64) -> f64 {
        steps * self.microns_per_step
    }

    pub fn microns_to_steps(&self, microns: f64) -> f64 {
        microns / self.microns_per_step
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width_px == 0 || self.height_px == 0 {
            return Err("sensor dimensions must be > 0".to_string());
        }
        if !(self.pixel_size_um.is_finite() && self.pixel_size_um > 0.0) {
            return Err(format!("pixel size must be > 0, got {}", self.pixel_size_um));
        }
        if !(self.microns_per_step.is_finite() && self.microns_per_step > 0.0) {
            return Err(format!(
                "microns per step must be > 0, got {}",
                self.microns_per_step
            ));
        }
        Ok(())
    }
}

/// One best-focus measurement at a sensor location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPoint {
    /// Microns from the sensor center (positive right).
    pub x: f64,
    /// Microns from the sensor center (positive down).
    pub y: f64,
    /// Best-focus focuser position in microns.
    pub focus: f64,
    /// R² of the focus curve this point came from, when known.
    pub r_squared: Option<f64>,
    pub enabled: bool,
}

impl SensorPoint {
    pub fn new(x: f64, y: f64, focus: f64) -> Self {
        Self {
            x,
            y,
            focus,
            r_squared: None,
            enabled: true,
        }
    }

    pub fn with_r_squared(mut self, r_squared: f64) -> Self {
        self.r_squared = Some(r_squared);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl DataPoint for SensorPoint {
    fn to_input(&self) -> Vec<f64> {
        vec![self.x, self.y]
    }

    fn to_output(&self) -> f64 {
        self.focus
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Switchable for SensorPoint {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl std::fmt::Display for SensorPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{X={}, Y={}, Focus={}", self.x, self.y, self.focus)?;
        if let Some(r2) = self.r_squared {
            write!(f, ", R2={r2}")?;
        }
        if !self.enabled {
            write!(f, ", disabled")?;
        }
        write!(f, "}}")
    }
}

/// How the surface fit picks its starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeedStrategy {
    /// Flat sensor at the nominal in-focus position.
    #[default]
    Nominal,
    /// Level, tilt and curvature from a linear fit of the centered surface.
    Linear,
}

/// Where the surface fit gets its Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum GradientMode {
    /// Finite differences inside the solver.
    #[default]
    Numeric,
    /// Closed-form partial derivatives of the paraboloid.
    Analytic,
}

/// Summary statistics of a sample set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub n_points: usize,
    pub n_enabled: usize,
    pub focus_min: f64,
    pub focus_max: f64,
}

impl DatasetStats {
    /// Statistics over enabled points; `None` when nothing is enabled.
    pub fn from_points(points: &[SensorPoint]) -> Option<Self> {
        let mut focus_min = f64::INFINITY;
        let mut focus_max = f64::NEG_INFINITY;
        let mut n_enabled = 0;
        for p in points.iter().filter(|p| p.enabled) {
            focus_min = focus_min.min(p.focus);
            focus_max = focus_max.max(p.focus);
            n_enabled += 1;
        }
        if n_enabled == 0 {
            return None;
        }
        Some(Self {
            n_points: points.len(),
            n_enabled,
            focus_min,
            focus_max,
        })
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub inputs: Vec<PathBuf>,
    pub geometry: SensorGeometry,
    /// Nominal in-focus focuser position in steps (defaults to the sample median).
    pub in_focus_steps: Option<f64>,
    pub fixed_center: bool,
    pub seed: SeedStrategy,
    pub gradient: GradientMode,
    pub min_r_squared: Option<f64>,
    pub rejection: RejectionConfig,
    pub solver: SolverConfig,
    /// Fail instead of reporting a best-effort model when the solver hits its cap.
    pub strict: bool,

    pub regions_wide: usize,
    pub regions_high: usize,
    /// Number of worst residuals to report.
    pub top_n: usize,

    pub export_model: Option<PathBuf>,
    pub export_residuals: Option<PathBuf>,
}

/// A saved model file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub tool: String,
    pub fitted_at: DateTime<Utc>,
    pub geometry: SensorGeometry,
    pub model: SensorParaboloid,
    pub diagnostics: FitDiagnostics,
    pub termination: Termination,
    pub rejected: usize,
}
