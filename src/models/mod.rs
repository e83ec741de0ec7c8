//! Sensor focus surface model.
//!
//! - `surface`: the tilted paraboloid and its geometric queries
//! - `problem`: binding the paraboloid to samples for the least-squares engine

pub mod problem;
pub mod surface;

pub use problem::*;
pub use surface::*;
