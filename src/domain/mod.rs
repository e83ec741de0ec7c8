//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - sensor geometry and unit conversions (`SensorGeometry`)
//! - best-focus samples (`SensorPoint`)
//! - run configuration (`FitConfig`, `SeedStrategy`, `GradientMode`)
//! - the saved model file (`ModelFile`)

pub mod types;

pub use types::*;
