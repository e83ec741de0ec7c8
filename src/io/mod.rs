//! Input/output helpers (CSV ingest, CSV export, model JSON).

pub mod export;
pub mod ingest;
pub mod model;

pub use export::*;
pub use ingest::*;
pub use model::*;
