//! Finite-difference gradients shared by every model.
//!
//! The step for parameter `i` is `scale[i] * epsilon`, so the perturbation
//! tracks the parameter's physical magnitude rather than its current value.

use serde::{Deserialize, Serialize};

/// Finite-difference scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difference {
    /// `(f(p + h) - f(p)) / h`: one extra evaluation per parameter.
    Forward,
    /// `(f(p + h) - f(p - h)) / 2h`: second-order accurate.
    #[default]
    Central,
}

/// Numeric gradient of `f` at `params`, written into `out`.
///
/// `f0` is `f(params)` (reused by the forward scheme).
pub fn numeric_gradient<F>(
    f: F,
    params: &[f64],
    f0: f64,
    scale: &[f64],
    epsilon: f64,
    scheme: Difference,
    out: &mut [f64],
) where
    F: Fn(&[f64]) -> f64,
{
    let mut probe = params.to_vec();
    for i in 0..params.len() {
        let h = scale[i] * epsilon;
        let original = probe[i];

        out[i] = match scheme {
            Difference::Forward => {
                probe[i] = original + h;
                let f_plus = f(&probe);
                (f_plus - f0) / h
            }
            Difference::Central => {
                probe[i] = original + h;
                let f_plus = f(&probe);
                probe[i] = original - h;
                let f_minus = f(&probe);
                (f_plus - f_minus) / (2.0 * h)
            }
        };

        probe[i] = original;
    }
}
