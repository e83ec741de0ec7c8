//! Damped normal equations for Levenberg–Marquardt steps.
//!
//! Solves
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) Δ = Jᵀr
//! ```
//!
//! The system is first equilibrated by the diagonal (`A' = D⁻¹ A D⁻¹` with
//! `D = sqrt(diag)`), so the damping term becomes `λ·I` and singular values are
//! comparable across parameters of very different magnitude. Columns whose
//! diagonal is zero (a parameter that currently has no effect on the model) are
//! floored so the system stays solvable and their step comes out as zero.

use nalgebra::{DMatrix, DVector};

/// Relative floor applied to the normal-matrix diagonal.
const DIAG_FLOOR_REL: f64 = 1e-12;

/// Relative singular-value cutoffs for the SVD fallback.
const SVD_TOLERANCES: [f64; 3] = [1e-14, 1e-12, 1e-10];

/// Solve the damped normal equations.
///
/// `frozen[i] == true` forces `Δ_i = 0` (parameters pinned by `lower == upper`).
/// Returns `None` when no finite solution exists.
pub fn solve_damped(
    jtj: &DMatrix<f64>,
    jtr: &DVector<f64>,
    lambda: f64,
    frozen: &[bool],
) -> Option<DVector<f64>> {
    let p = jtr.len();
    if jtj.nrows() != p || jtj.ncols() != p || frozen.len() != p {
        return None;
    }
    if !(lambda.is_finite() && jtj.iter().chain(jtr.iter()).all(|v| v.is_finite())) {
        return None;
    }

    let max_diag = (0..p)
        .filter(|&i| !frozen[i])
        .map(|i| jtj[(i, i)])
        .fold(0.0_f64, f64::max);
    let floor = (max_diag * DIAG_FLOOR_REL).max(f64::MIN_POSITIVE);

    let d: Vec<f64> = (0..p).map(|i| jtj[(i, i)].max(floor).sqrt()).collect();

    let mut a = DMatrix::<f64>::zeros(p, p);
    let mut b = DVector::<f64>::zeros(p);
    for i in 0..p {
        if frozen[i] {
            a[(i, i)] = 1.0;
            continue;
        }
        b[i] = jtr[i] / d[i];
        for j in 0..p {
            if frozen[j] {
                continue;
            }
            a[(i, j)] = jtj[(i, j)] / (d[i] * d[j]);
        }
        a[(i, i)] = jtj[(i, i)].max(floor) / (d[i] * d[i]) + lambda;
    }

    let scaled = solve_symmetric(a, &b)?;
    let delta = DVector::from_iterator(
        p,
        (0..p).map(|i| if frozen[i] { 0.0 } else { scaled[i] / d[i] }),
    );

    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

fn solve_symmetric(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }

    let svd = a.svd(true, true);
    let s_max = svd.singular_values.max();
    if !(s_max.is_finite() && s_max > 0.0) {
        return None;
    }
    for &tol in &SVD_TOLERANCES {
        if let Ok(x) = svd.solve(b, tol * s_max) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_damping_solves_normal_equations() {
        let jtj = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let jtr = DVector::from_row_slice(&[1.0, 2.0]);
        let delta = solve_damped(&jtj, &jtr, 0.0, &[false, false]).unwrap();
        let check = &jtj * &delta;
        assert!((check[0] - 1.0).abs() < 1e-12);
        assert!((check[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn damping_shrinks_the_step() {
        let jtj = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 8.0]);
        let jtr = DVector::from_row_slice(&[2.0, 8.0]);
        let small = solve_damped(&jtj, &jtr, 0.0, &[false, false]).unwrap();
        let big = solve_damped(&jtj, &jtr, 9.0, &[false, false]).unwrap();
        assert!((small[0] - 1.0).abs() < 1e-12);
        // (a + 9a) Δ = a  =>  Δ = 0.1
        assert!((big[0] - 0.1).abs() < 1e-12);
        assert!((big[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn zero_column_gets_zero_step() {
        let jtj = DMatrix::from_row_slice(2, 2, &[5.0, 0.0, 0.0, 0.0]);
        let jtr = DVector::from_row_slice(&[5.0, 0.0]);
        let delta = solve_damped(&jtj, &jtr, 1e-3, &[false, false]).unwrap();
        assert!((delta[0] - 1.0 / 1.001).abs() < 1e-12);
        assert_eq!(delta[1], 0.0);
    }

    #[test]
    fn non_finite_system_has_no_step() {
        let jtj = DMatrix::from_row_slice(1, 1, &[f64::NAN]);
        let jtr = DVector::from_row_slice(&[1.0]);
        assert!(solve_damped(&jtj, &jtr, 1e-3, &[false]).is_none());
    }

    #[test]
    fn frozen_parameters_do_not_move() {
        let jtj = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 4.0]);
        let jtr = DVector::from_row_slice(&[4.0, 4.0]);
        let delta = solve_damped(&jtj, &jtr, 0.0, &[true, false]).unwrap();
        assert_eq!(delta[0], 0.0);
        assert!((delta[1] - 1.0).abs() < 1e-12);
    }
}
