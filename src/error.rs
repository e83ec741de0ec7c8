//! Error types.
//!
//! Two layers:
//!
//! - [`FitError`]: the least-squares engine's taxonomy. Structural problems are raised
//!   before any iteration; numerical outcomes carry the best parameters seen.
//! - [`AppError`]: what the `tilt` binary reports (message + process exit code).

use thiserror::Error;

/// Failure modes of a bounded least-squares fit.
#[derive(Debug, Clone, Error)]
pub enum FitError {
    /// Malformed input: wrong parameter array length, NaN or crossed bounds,
    /// non-positive scale, inconsistent input dimensionality.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Not enough enabled data points to determine the parameters.
    #[error("Underdetermined: {enabled} enabled points, at least {required} required")]
    Underdetermined { enabled: usize, required: usize },

    /// The starting point is unusable (outside bounds, non-finite objective).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Damping grew past the retry budget without improving the objective.
    #[error("Diverged after {iterations} iterations (lambda={lambda:.3e})")]
    Divergence {
        iterations: usize,
        lambda: f64,
        best: Vec<f64>,
    },

    /// Iteration cap reached before the convergence tolerances were met.
    #[error("Did not converge within {iterations} iterations")]
    DidNotConverge { iterations: usize, best: Vec<f64> },

    /// The model asked for an analytic gradient it does not provide.
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl FitError {
    /// Best-effort parameters for numerical failures, if any.
    pub fn best_params(&self) -> Option<&[f64]> {
        match self {
            FitError::Divergence { best, .. } | FitError::DidNotConverge { best, .. } => {
                Some(best)
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match err {
            FitError::InvalidArgument(_) | FitError::InvalidState(_) | FitError::NotSupported(_) => 2,
            FitError::Underdetermined { .. } => 3,
            FitError::Divergence { .. } | FitError::DidNotConverge { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
