//! Shared fit pipeline.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! CSV ingest -> surface fit (+ rejection) -> regions/corners -> residual ranking
//!
//! The front-end can then focus on presentation and exports.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::LeastSquaresSolver;
use crate::io::ingest::{IngestedData, load_sensor_points};
use crate::math::median_mut;
use crate::models::{CornerTilt, SurfaceConfig, SurfaceFit, SurfaceProblem, fit_surface};
use crate::report::{RegionStat, SampleResidual, largest_residuals, region_stats};

/// All computed outputs for one input file.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedData,
    pub fit: SurfaceFit,
    pub regions: Vec<RegionStat>,
    pub corners: CornerTilt,
    pub largest: Vec<SampleResidual>,
}

/// Fit every input file in parallel; results keep input order.
pub fn run_all(config: &FitConfig) -> Vec<(PathBuf, Result<RunOutput, AppError>)> {
    config
        .inputs
        .par_iter()
        .map(|path| (path.clone(), run_file(path, config)))
        .collect()
}

/// Execute the full pipeline for a single file.
pub fn run_file(path: &Path, config: &FitConfig) -> Result<RunOutput, AppError> {
    let ingest = load_sensor_points(path, &config.geometry)?;
    run_ingested(ingest, config)
}

/// Execute the pipeline on already-ingested samples.
pub fn run_ingested(ingest: IngestedData, config: &FitConfig) -> Result<RunOutput, AppError> {
    let geometry = &config.geometry;
    let in_focus_um = match config.in_focus_steps {
        Some(steps) => geometry.steps_to_microns(steps),
        None => median_focus(&ingest)
            .ok_or_else(|| AppError::new(3, "No enabled samples to derive the in-focus position."))?,
    };

    let surface = SurfaceConfig {
        width_um: geometry.width_um(),
        height_um: geometry.height_um(),
        in_focus_um,
        fixed_center: config.fixed_center,
        seed: config.seed,
        gradient: config.gradient,
        min_r_squared: config.min_r_squared,
    };

    let problem = SurfaceProblem::new(ingest.points.clone(), surface)?;
    let solver = LeastSquaresSolver::new(config.solver.clone());
    let fit = fit_surface(problem, &solver, &config.rejection)?;

    if config.strict && !fit.converged() {
        return Err(AppError::new(
            4,
            format!(
                "{}: solver stopped after {} iterations without converging",
                ingest.path.display(),
                fit.report.iterations
            ),
        ));
    }

    let regions = region_stats(
        &fit.model,
        &fit.points,
        geometry.width_um(),
        geometry.height_um(),
        config.regions_wide,
        config.regions_high,
    )?;
    let corners = fit.model.corner_tilt(geometry.width_um(), geometry.height_um());
    let largest = largest_residuals(&fit, config.top_n);

    info!(
        file = %ingest.path.display(),
        stars = fit.stars_in_model(),
        spread_um = corners.spread(),
        "run complete"
    );

    Ok(RunOutput {
        ingest,
        fit,
        regions,
        corners,
        largest,
    })
}

fn median_focus(ingest: &IngestedData) -> Option<f64> {
    let mut focus: Vec<f64> = ingest
        .points
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.focus)
        .collect();
    median_mut(&mut focus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SynthConfig, generate_sample};
    use crate::domain::{GradientMode, SeedStrategy, SensorGeometry};
    use crate::fit::{RejectionConfig, SolverConfig};
    use crate::io::export::write_samples_csv;
    use crate::models::SensorParaboloid;

    fn geometry() -> SensorGeometry {
        SensorGeometry {
            width_px: 3000,
            height_px: 2000,
            pixel_size_um: 4.0,
            microns_per_step: 2.0,
        }
    }

    fn config(inputs: Vec<PathBuf>) -> FitConfig {
        FitConfig {
            inputs,
            geometry: geometry(),
            in_focus_steps: None,
            fixed_center: true,
            seed: SeedStrategy::Linear,
            gradient: GradientMode::Numeric,
            min_r_squared: None,
            rejection: RejectionConfig::default(),
            solver: SolverConfig::default(),
            strict: false,
            regions_wide: 3,
            regions_high: 3,
            top_n: 5,
            export_model: None,
            export_residuals: None,
        }
    }

    fn synth_file(name: &str, seed: u64) -> (PathBuf, SensorParaboloid) {
        let model = SensorParaboloid {
            z0: 20000.0,
            theta: 0.003,
            phi: 0.8,
            c: 0.0003,
            ..Default::default()
        };
        let sample = generate_sample(&SynthConfig {
            geometry: geometry(),
            model,
            grid_wide: 10,
            grid_high: 7,
            noise_um: 0.5,
            outlier_prob: 0.0,
            outlier_um: 0.0,
            seed,
        })
        .unwrap();
        let path = std::env::temp_dir().join(format!("tilt-{name}-{}.csv", std::process::id()));
        write_samples_csv(&path, &sample.points, &geometry()).unwrap();
        (path, model)
    }

    #[test]
    fn fits_files_in_parallel_in_input_order() {
        let (a, model) = synth_file("pipeline-a", 1);
        let (b, _) = synth_file("pipeline-b", 2);
        let runs = run_all(&config(vec![a.clone(), b.clone()]));
        let _ = std::fs::remove_file(&a);
        let _ = std::fs::remove_file(&b);

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, a);
        assert_eq!(runs[1].0, b);
        for (_, run) in runs {
            let run = run.unwrap();
            assert_eq!(run.fit.stars_in_model() + run.fit.rejected.len(), 70);
            assert!(run.fit.rms_error_microns() < 1.5, "rms {}", run.fit.rms_error_microns());
            assert!((run.fit.model.theta - model.theta).abs() < 2e-4);
            assert_eq!(run.regions.len(), 9);
            assert_eq!(run.largest.len(), 5);
        }
    }

    #[test]
    fn missing_file_is_reported_per_input() {
        let runs = run_all(&config(vec![PathBuf::from("/nonexistent/tilt.csv")]));
        let err = runs[0].1.as_ref().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
