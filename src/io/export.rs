//! CSV writers.
//!
//! - per-sample residuals of a fitted surface (spreadsheet friendly)
//! - raw samples in the same schema `ingest` reads (used by `tilt synth`)

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::{SensorGeometry, SensorPoint};
use crate::error::AppError;
use crate::models::SurfaceFit;

/// Write per-sample residuals of a fit to a CSV file.
pub fn write_residuals_csv(path: &Path, fit: &SurfaceFit, geometry: &SensorGeometry) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create residual CSV '{}': {e}", path.display())))?;
    write_residuals(file, fit, geometry)
}

pub fn write_residuals<W: Write>(mut out: W, fit: &SurfaceFit, geometry: &SensorGeometry) -> Result<(), AppError> {
    writeln!(
        out,
        "index,x_px,y_px,x_um,y_um,focus_um,fit_um,residual_um,r2,enabled,rejected"
    )
    .map_err(|e| AppError::new(2, format!("Failed to write residual CSV header: {e}")))?;

    for (idx, (p, residual)) in fit.points.iter().zip(fit.residuals()).enumerate() {
        let (x_px, y_px) = geometry.sensor_to_pixel(p.x, p.y);
        writeln!(
            out,
            "{},{:.2},{:.2},{:.3},{:.3},{:.4},{:.4},{:.4},{},{},{}",
            idx,
            x_px,
            y_px,
            p.x,
            p.y,
            p.focus,
            p.focus - residual,
            residual,
            p.r_squared.map(|v| format!("{v:.6}")).unwrap_or_default(),
            p.enabled,
            fit.rejected.contains(&idx),
        )
        .map_err(|e| AppError::new(2, format!("Failed to write residual CSV row: {e}")))?;
    }

    Ok(())
}

/// Write samples back out in pixel/step units.
pub fn write_samples_csv(path: &Path, points: &[SensorPoint], geometry: &SensorGeometry) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create sample CSV '{}': {e}", path.display())))?;
    write_samples(file, points, geometry)
}

pub fn write_samples<W: Write>(mut out: W, points: &[SensorPoint], geometry: &SensorGeometry) -> Result<(), AppError> {
    writeln!(out, "x,y,focus,r2,enabled")
        .map_err(|e| AppError::new(2, format!("Failed to write sample CSV header: {e}")))?;

    for p in points {
        let (x_px, y_px) = geometry.sensor_to_pixel(p.x, p.y);
        writeln!(
            out,
            "{:.3},{:.3},{:.4},{},{}",
            x_px,
            y_px,
            geometry.microns_to_steps(p.focus),
            p.r_squared.map(|v| format!("{v:.4}")).unwrap_or_default(),
            p.enabled,
        )
        .map_err(|e| AppError::new(2, format!("Failed to write sample CSV row: {e}")))?;
    }

    Ok(())
}
