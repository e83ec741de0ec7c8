//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - runs surface fits (one per input file)
//! - prints reports
//! - writes optional exports

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};

use crate::cli::{Command, EvalArgs, FitArgs, SynthArgs};
use crate::data::{SynthConfig, generate_sample};
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::{Difference, RejectionConfig, SolverConfig};
use crate::models::SensorParaboloid;

pub mod pipeline;

/// Entry point for the `tilt` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    crate::logging::setup_logging(cli.verbose)?;

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Synth(args) => handle_synth(args),
        Command::Eval(args) => handle_eval(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let multi = config.inputs.len() > 1;

    let mut first_error = None;
    for (path, result) in pipeline::run_all(&config) {
        let run = match result {
            Ok(run) => run,
            Err(err) => {
                error!(file = %path.display(), "{err}");
                first_error.get_or_insert(err);
                continue;
            }
        };

        println!(
            "{}",
            crate::report::format_fit_summary(&run.ingest, &run.fit, &config.geometry)
        );
        println!("{}", crate::report::format_corners(&run.corners, &config.geometry));
        println!("{}", crate::report::format_regions(&run.regions, config.regions_wide));
        if config.top_n > 0 {
            println!("{}", crate::report::format_largest_residuals(&run.largest));
        }

        if let Some(base) = &config.export_model {
            let target = export_path_for(base, &path, multi);
            let file = crate::io::model_file(&run.fit, &config.geometry);
            crate::io::write_model_json(&target, &file)?;
            info!(path = %target.display(), "model written");
        }
        if let Some(base) = &config.export_residuals {
            let target = export_path_for(base, &path, multi);
            crate::io::write_residuals_csv(&target, &run.fit, &config.geometry)?;
            info!(path = %target.display(), "residuals written");
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let geometry = args.sensor.geometry();
    let model = SensorParaboloid {
        x0: args.x0,
        y0: args.y0,
        z0: geometry.steps_to_microns(args.z0),
        theta: args.theta.to_radians(),
        phi: args.phi.to_radians(),
        c: args.c,
    };

    let sample = generate_sample(&SynthConfig {
        geometry,
        model,
        grid_wide: args.grid_wide,
        grid_high: args.grid_high,
        noise_um: args.noise,
        outlier_prob: args.outlier_prob,
        outlier_um: args.outlier,
        seed: args.random_seed,
    })?;

    crate::io::write_samples_csv(&args.output, &sample.points, &geometry)?;
    println!(
        "Wrote {} samples ({} with gross errors) to {}",
        sample.points.len(),
        sample.outliers.len(),
        args.output.display()
    );
    println!("Truth: {model}");
    Ok(())
}

fn handle_eval(args: EvalArgs) -> Result<(), AppError> {
    let file = crate::io::read_model_json(&args.model)?;
    println!("{}", crate::report::format_model_file(&file));

    if !args.at.is_empty() {
        let g = &file.geometry;
        println!("Predicted focus:");
        for (x_px, y_px) in &args.at {
            let (x, y) = g.pixel_to_sensor(*x_px, *y_px);
            let focus = file.model.value_at(x, y);
            println!(
                "  ({x_px:.1}, {y_px:.1}) px -> {focus:.2}um ({:.1} steps)",
                g.microns_to_steps(focus)
            );
        }
    }
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let geometry = args.sensor.geometry();
    geometry
        .validate()
        .map_err(|e| AppError::new(2, format!("Invalid sensor geometry: {e}")))?;

    let solver = SolverConfig {
        max_iterations: args.max_iterations,
        difference: if args.forward_difference {
            Difference::Forward
        } else {
            Difference::Central
        },
        ..SolverConfig::default()
    };
    solver.validate()?;

    Ok(FitConfig {
        inputs: args.inputs.clone(),
        geometry,
        in_focus_steps: args.in_focus,
        fixed_center: args.fixed_center,
        seed: args.seed,
        gradient: args.gradient,
        min_r_squared: args.min_r2,
        rejection: RejectionConfig {
            k: args.reject_k,
            rounds: args.reject_rounds,
        },
        solver,
        strict: args.strict,
        regions_wide: args.regions_wide,
        regions_high: args.regions_high,
        top_n: args.top,
        export_model: args.export_model.clone(),
        export_residuals: args.export_residuals.clone(),
    })
}

/// With several inputs, exports get the input's stem appended:
/// `model.json` + `night1.csv` -> `model-night1.json`.
fn export_path_for(base: &Path, input: &Path, multi: bool) -> PathBuf {
    if !multi {
        return base.to_path_buf();
    }
    let stem = base.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let input_stem = input.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let mut name = format!("{stem}-{input_stem}");
    if let Some(ext) = base.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    base.with_file_name(name)
}
