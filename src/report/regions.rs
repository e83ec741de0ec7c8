//! Per-region focus statistics.
//!
//! The sensor is split into a `wide × high` grid. Each cell reports how many
//! enabled samples fell into it, their mean focus and residual RMS, and where
//! the fitted surface puts focus at the cell center relative to the sensor
//! center. Cells are independent, so they are computed in parallel.

use rayon::prelude::*;
use serde::Serialize;

use crate::domain::SensorPoint;
use crate::error::FitError;
use crate::models::SensorParaboloid;

/// Sample statistics of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellSamples {
    pub count: usize,
    pub mean_focus: f64,
    pub residual_rms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionStat {
    pub col: usize,
    pub row: usize,
    /// Cell center in microns from the sensor center.
    pub center_x: f64,
    pub center_y: f64,
    /// Model focus at the cell center.
    pub model_focus: f64,
    /// `model_focus` minus the model focus at the sensor center.
    pub offset: f64,
    /// `None` when no enabled sample falls in the cell.
    pub samples: Option<CellSamples>,
}

/// Compute region statistics in row-major order (top-left first).
pub fn region_stats(
    model: &SensorParaboloid,
    points: &[SensorPoint],
    width: f64,
    height: f64,
    wide: usize,
    high: usize,
) -> Result<Vec<RegionStat>, FitError> {
    if wide == 0 || high == 0 {
        return Err(FitError::InvalidArgument(format!(
            "region grid must be at least 1x1, got {wide}x{high}"
        )));
    }
    if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
        return Err(FitError::InvalidArgument(format!(
            "sensor extent must be > 0, got {width}x{height}"
        )));
    }

    let cell_w = width / wide as f64;
    let cell_h = height / high as f64;
    let center_focus = model.value_at(0.0, 0.0);

    let cells: Vec<(usize, usize)> = (0..high)
        .flat_map(|row| (0..wide).map(move |col| (col, row)))
        .collect();

    let stats = cells
        .par_iter()
        .map(|&(col, row)| {
            let center_x = -width / 2.0 + (col as f64 + 0.5) * cell_w;
            let center_y = -height / 2.0 + (row as f64 + 0.5) * cell_h;
            let model_focus = model.value_at(center_x, center_y);

            let mut count = 0usize;
            let mut focus_sum = 0.0;
            let mut ss = 0.0;
            for p in points.iter().filter(|p| p.enabled) {
                if cell_of(p.x, width, cell_w, wide) != col || cell_of(p.y, height, cell_h, high) != row {
                    continue;
                }
                count += 1;
                focus_sum += p.focus;
                let r = p.focus - model.value_at(p.x, p.y);
                ss += r * r;
            }

            let samples = (count > 0).then(|| CellSamples {
                count,
                mean_focus: focus_sum / count as f64,
                residual_rms: (ss / count as f64).sqrt(),
            });

            RegionStat {
                col,
                row,
                center_x,
                center_y,
                model_focus,
                offset: model_focus - center_focus,
                samples,
            }
        })
        .collect();

    Ok(stats)
}

/// Cell index along one axis; samples on or past the edge land in the outer cells.
fn cell_of(v: f64, extent: f64, cell: f64, n: usize) -> usize {
    let idx = ((v + extent / 2.0) / cell).floor();
    if idx <= 0.0 {
        0
    } else {
        (idx as usize).min(n - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_the_tilt() {
        let model = SensorParaboloid {
            z0: 500.0,
            theta: 0.001,
            phi: 0.0,
            ..Default::default()
        };
        let stats = region_stats(&model, &[], 3000.0, 3000.0, 3, 3).unwrap();
        assert_eq!(stats.len(), 9);

        // Middle cell sits on the sensor center.
        let middle = stats[4];
        assert_eq!((middle.col, middle.row), (1, 1));
        assert!(middle.offset.abs() < 1e-12);

        let left = stats[3];
        let right = stats[5];
        assert!((left.offset + 1000.0 * 0.001_f64.tan()).abs() < 1e-9);
        assert!((right.offset - 1000.0 * 0.001_f64.tan()).abs() < 1e-9);
        assert!(stats.iter().all(|s| s.samples.is_none()));
    }

    #[test]
    fn samples_are_binned_by_position() {
        let model = SensorParaboloid {
            z0: 100.0,
            ..Default::default()
        };
        let points = vec![
            SensorPoint::new(-900.0, -900.0, 101.0),
            SensorPoint::new(-800.0, -700.0, 103.0),
            SensorPoint::new(900.0, 900.0, 100.0),
            // On the far edge: clamped into the last cell.
            SensorPoint::new(1000.0, 1000.0, 100.0),
            SensorPoint::new(-900.0, 900.0, 500.0).disabled(),
        ];
        let stats = region_stats(&model, &points, 2000.0, 2000.0, 2, 2).unwrap();

        let top_left = stats[0].samples.unwrap();
        assert_eq!(top_left.count, 2);
        assert!((top_left.mean_focus - 102.0).abs() < 1e-12);
        assert!((top_left.residual_rms - 5.0_f64.sqrt()).abs() < 1e-12);

        assert!(stats[1].samples.is_none());
        assert!(stats[2].samples.is_none());
        assert_eq!(stats[3].samples.unwrap().count, 2);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let err = region_stats(&SensorParaboloid::default(), &[], 10.0, 10.0, 0, 3).unwrap_err();
        assert!(matches!(err, FitError::InvalidArgument(_)));
    }
}
