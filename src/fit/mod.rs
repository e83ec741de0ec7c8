//! Generic bounded nonlinear least squares.
//!
//! Responsibilities:
//!
//! - model contracts (`DataPoint`, `ParameterVector`, `ModelFunction`)
//! - finite-difference gradients shared by all models
//! - the Levenberg–Marquardt solver and its diagnostics
//! - outlier exclusion by residual clipping

pub mod jacobian;
pub mod rejection;
pub mod solver;
pub mod traits;

pub use jacobian::*;
pub use rejection::*;
pub use solver::*;
pub use traits::*;
