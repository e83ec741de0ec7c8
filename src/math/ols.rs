//! Weighted linear least squares.
//!
//! Used to seed the surface fit with the linearized paraboloid centered on the
//! sensor:
//!
//! ```text
//! minimize Σ w_i (z_i - (a + b x_i + c y_i + d (x_i² + y_i²)))^2
//! ```
//!
//! Rows are scaled by `sqrt(w_i)` and the resulting ordinary least squares
//! problem is solved with SVD, which copes with tall design matrices and
//! degenerate layouts such as all samples on a single row of the sensor.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Coefficients of `z = intercept + slope_x * x + slope_y * y + radial * (x² + y²)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric {
    pub intercept: f64,
    pub slope_x: f64,
    pub slope_y: f64,
    pub radial: f64,
}

/// Fit a weighted centered quadric through `(x, y, z)` samples.
///
/// Returns `None` for fewer than four samples, mismatched lengths, non-finite
/// inputs or a singular layout.
pub fn fit_quadric(x: &[f64], y: &[f64], z: &[f64], w: &[f64]) -> Option<Quadric> {
    let n = x.len();
    if n < 4 || y.len() != n || z.len() != n || w.len() != n {
        return None;
    }

    // Coordinates are normalized by their largest magnitude so the radial column
    // is not orders of magnitude above the constant one.
    let norm = x
        .iter()
        .chain(y.iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()))
        .max(1.0);

    let mut design = DMatrix::<f64>::zeros(n, 4);
    let mut rhs = DVector::<f64>::zeros(n);
    for i in 0..n {
        if !(x[i].is_finite() && y[i].is_finite() && z[i].is_finite() && w[i] >= 0.0) {
            return None;
        }
        let sw = w[i].sqrt();
        let (u, v) = (x[i] / norm, y[i] / norm);
        design[(i, 0)] = sw;
        design[(i, 1)] = u * sw;
        design[(i, 2)] = v * sw;
        design[(i, 3)] = (u * u + v * v) * sw;
        rhs[i] = z[i] * sw;
    }

    let beta = solve_least_squares(&design, &rhs)?;
    Some(Quadric {
        intercept: beta[0],
        slope_x: beta[1] / norm,
        slope_y: beta[2] / norm,
        radial: beta[3] / (norm * norm),
    })
}
