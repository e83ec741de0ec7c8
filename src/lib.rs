//! `sensor-tilt` library crate.
//!
//! The binary (`tilt`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the least-squares engine (`fit`) is reusable for other models
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod report;
