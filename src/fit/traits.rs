//! Contracts between the generic least-squares engine and concrete models.
//!
//! The engine only ever talks to a model through these traits: it never sees
//! sensor geometry, focus units or parameter meaning.

use crate::error::FitError;

/// One measured sample.
pub trait DataPoint {
    /// Input coordinates (length `K`, the model's input dimensionality).
    fn to_input(&self) -> Vec<f64>;

    /// Observed scalar response.
    fn to_output(&self) -> f64;

    /// Whether the point takes part in the fit. Disabled points stay in the
    /// collection but are ignored by residuals, diagnostics and counts.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A strongly typed parameter set with a stable flat representation.
///
/// `from_array(&to_array())` must reproduce the value bit for bit.
pub trait ParameterVector {
    /// Number of parameters (`P`).
    const LEN: usize;

    /// Parameter names in array order.
    fn names() -> &'static [&'static str];

    fn to_array(&self) -> Vec<f64>;

    /// Overwrite all parameters from `values`.
    ///
    /// Fails with [`FitError::InvalidArgument`] unless `values.len() == LEN`.
    fn from_array(&mut self, values: &[f64]) -> Result<(), FitError>;
}

/// Check a flat parameter slice against a parameter vector's declared length.
pub fn check_len<P: ParameterVector>(values: &[f64]) -> Result<(), FitError> {
    if values.len() != P::LEN {
        return Err(FitError::InvalidArgument(format!(
            "expected {} parameters, got {}",
            P::LEN,
            values.len()
        )));
    }
    Ok(())
}

/// Per-application model: prediction, starting point, bounds and scaling.
///
/// A model function is built for one fit and owns (or borrows) the data points
/// it is fitted against.
pub trait ModelFunction {
    type Point: DataPoint;
    type Params: ParameterVector + Default;

    /// The data collection this model is bound to (enabled and disabled).
    fn points(&self) -> &[Self::Point];

    /// Input dimensionality `K` expected by [`ModelFunction::value`].
    fn input_dim(&self) -> usize;

    /// Predicted output for `input` under `params`. Must be pure.
    fn value(&self, params: &[f64], input: &[f64]) -> f64;

    /// When `true`, the engine calls [`ModelFunction::gradient`] instead of
    /// differentiating numerically.
    fn use_analytic_gradient(&self) -> bool {
        false
    }

    /// Partial derivatives of [`ModelFunction::value`] with respect to each
    /// parameter, written to `out` (length `P`).
    fn gradient(&self, params: &[f64], input: &[f64], out: &mut [f64]) -> Result<(), FitError> {
        let _ = (params, input, out);
        Err(FitError::NotSupported(
            "analytic gradient is not implemented for this model".to_string(),
        ))
    }

    /// Feasible starting point.
    fn initial_guess(&self, guess: &mut [f64]);

    /// Per-parameter bounds. Infinite values mean unbounded.
    fn bounds(&self, lower: &mut [f64], upper: &mut [f64]);

    /// Per-parameter positive scale factors (typical magnitude of a change).
    fn scale(&self, scale: &mut [f64]);
}
