//! Command-line parsing for the sensor tilt analyzer.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::{GradientMode, SeedStrategy, SensorGeometry};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "tilt", version, about = "Sensor tilt and field curvature from star focus samples")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the focus surface to one or more sample CSVs and print diagnostics.
    Fit(FitArgs),
    /// Generate a synthetic sample CSV from known surface parameters.
    Synth(SynthArgs),
    /// Evaluate a previously exported model JSON.
    Eval(EvalArgs),
}

/// Sensor and focuser geometry.
#[derive(Debug, Args, Clone)]
pub struct SensorArgs {
    /// Sensor width in pixels.
    #[arg(long, default_value_t = 6248)]
    pub width_px: u32,

    /// Sensor height in pixels.
    #[arg(long, default_value_t = 4176)]
    pub height_px: u32,

    /// Pixel size in microns.
    #[arg(long, default_value_t = 3.76)]
    pub pixel_size: f64,

    /// Focuser travel per step in microns.
    #[arg(long, default_value_t = 1.0)]
    pub microns_per_step: f64,
}

impl SensorArgs {
    pub fn geometry(&self) -> SensorGeometry {
        SensorGeometry {
            width_px: self.width_px,
            height_px: self.height_px,
            pixel_size_um: self.pixel_size,
            microns_per_step: self.microns_per_step,
        }
    }
}

/// Options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Sample CSV files (`x,y,focus[,r2][,enabled]`, pixels and focuser steps).
    #[arg(required = true, value_name = "CSV")]
    pub inputs: Vec<PathBuf>,

    #[command(flatten)]
    pub sensor: SensorArgs,

    /// Nominal in-focus position in steps (defaults to the median sample focus).
    #[arg(long)]
    pub in_focus: Option<f64>,

    /// Pin the paraboloid vertex to the sensor center.
    #[arg(long)]
    pub fixed_center: bool,

    /// Starting point for the solver.
    #[arg(long, value_enum, default_value_t = SeedStrategy::Linear)]
    pub seed: SeedStrategy,

    /// Jacobian source.
    #[arg(long, value_enum, default_value_t = GradientMode::Numeric)]
    pub gradient: GradientMode,

    /// Ignore samples whose focus-curve R² is below this.
    #[arg(long)]
    pub min_r2: Option<f64>,

    /// Outlier clip threshold in robust standard deviations.
    #[arg(long, default_value_t = 3.0)]
    pub reject_k: f64,

    /// Outlier clip-and-refit rounds (0 disables rejection).
    #[arg(long, default_value_t = 2)]
    pub reject_rounds: usize,

    /// Solver iteration cap.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Use forward instead of central finite differences.
    #[arg(long)]
    pub forward_difference: bool,

    /// Fail when the solver stops at the iteration cap.
    #[arg(long)]
    pub strict: bool,

    /// Region grid columns.
    #[arg(long, default_value_t = 3)]
    pub regions_wide: usize,

    /// Region grid rows.
    #[arg(long, default_value_t = 3)]
    pub regions_high: usize,

    /// Show the N largest residuals.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Export the fitted model to JSON.
    #[arg(long = "export-model", value_name = "JSON")]
    pub export_model: Option<PathBuf>,

    /// Export per-sample residuals to CSV.
    #[arg(long = "export-residuals", value_name = "CSV")]
    pub export_residuals: Option<PathBuf>,
}

/// Options for synthetic sample generation.
#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Output CSV.
    #[arg(short, long, value_name = "CSV")]
    pub output: PathBuf,

    #[command(flatten)]
    pub sensor: SensorArgs,

    /// Vertex X offset from the sensor center, microns.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub x0: f64,

    /// Vertex Y offset from the sensor center, microns.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub y0: f64,

    /// Focus at the vertex, focuser steps.
    #[arg(long, default_value_t = 10000.0)]
    pub z0: f64,

    /// Tilt angle, degrees.
    #[arg(long, default_value_t = 0.05)]
    pub theta: f64,

    /// Tilt direction, degrees.
    #[arg(long, default_value_t = 30.0, allow_negative_numbers = true)]
    pub phi: f64,

    /// Curvature parameter C (signed).
    #[arg(long, default_value_t = 0.0002, allow_negative_numbers = true)]
    pub c: f64,

    /// Star grid columns.
    #[arg(long, default_value_t = 12)]
    pub grid_wide: usize,

    /// Star grid rows.
    #[arg(long, default_value_t = 8)]
    pub grid_high: usize,

    /// Focus noise standard deviation, microns.
    #[arg(long, default_value_t = 2.0)]
    pub noise: f64,

    /// Probability of a gross focus error per star.
    #[arg(long, default_value_t = 0.03)]
    pub outlier_prob: f64,

    /// Gross focus error size, microns.
    #[arg(long, default_value_t = 40.0)]
    pub outlier: f64,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub random_seed: u64,
}

/// Options for evaluating a saved model.
#[derive(Debug, Parser)]
pub struct EvalArgs {
    /// Model JSON file produced by `tilt fit --export-model`.
    #[arg(long, value_name = "JSON")]
    pub model: PathBuf,

    /// Pixel positions `X,Y` at which to predict focus (repeatable).
    #[arg(long = "at", value_name = "X,Y", value_parser = parse_pixel)]
    pub at: Vec<(f64, f64)>,
}

fn parse_pixel(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{s}'"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("invalid X '{x}': {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("invalid Y '{y}': {e}"))?;
    Ok((x, y))
}
