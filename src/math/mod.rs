//! Mathematical utilities: linear least squares, damped normal equations and medians.

pub mod damped;
pub mod ols;
pub mod stats;

pub use damped::*;
pub use ols::*;
pub(crate) use stats::median_mut;
