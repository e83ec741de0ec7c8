//! Reporting utilities: residuals, region statistics and formatted terminal output.

pub mod format;
pub mod regions;

pub use format::*;
pub use regions::*;

use crate::domain::SensorPoint;
use crate::models::SurfaceFit;

/// One sample with its fitted focus.
#[derive(Debug, Clone)]
pub struct SampleResidual {
    pub index: usize,
    pub point: SensorPoint,
    pub fitted: f64,
    pub residual: f64,
}

/// Enabled samples with the largest absolute residuals, worst first.
pub fn largest_residuals(fit: &SurfaceFit, top_n: usize) -> Vec<SampleResidual> {
    let mut rows: Vec<SampleResidual> = fit
        .points
        .iter()
        .zip(fit.residuals())
        .enumerate()
        .filter(|(_, (p, _))| p.enabled)
        .map(|(index, (p, residual))| SampleResidual {
            index,
            point: p.clone(),
            fitted: p.focus - residual,
            residual,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.residual
            .abs()
            .partial_cmp(&a.residual.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.truncate(top_n);
    rows
}
