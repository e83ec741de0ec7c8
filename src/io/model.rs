//! Read/write model JSON files.
//!
//! Model JSON is the portable representation of a fitted surface:
//! - sensor geometry the fit was made for
//! - paraboloid parameters and fit diagnostics
//! - when and how the fit finished
//!
//! The schema is defined by `domain::ModelFile`.

use std::fs::File;
use std::path::Path;

use chrono::Utc;

use crate::domain::{ModelFile, SensorGeometry};
use crate::error::AppError;
use crate::models::SurfaceFit;

/// Build the file representation of a fit.
pub fn model_file(fit: &SurfaceFit, geometry: &SensorGeometry) -> ModelFile {
    ModelFile {
        tool: "tilt".to_string(),
        fitted_at: Utc::now(),
        geometry: *geometry,
        model: fit.model,
        diagnostics: fit.diagnostics,
        termination: fit.report.termination,
        rejected: fit.rejected.len(),
    }
}

/// Write a model JSON file.
pub fn write_model_json(path: &Path, model: &ModelFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create model JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, model)
        .map_err(|e| AppError::new(2, format!("Failed to write model JSON: {e}")))?;
    Ok(())
}

/// Read a model JSON file.
pub fn read_model_json(path: &Path) -> Result<ModelFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open model JSON '{}': {e}", path.display())))?;
    let model: ModelFile =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid model JSON: {e}")))?;
    model
        .geometry
        .validate()
        .map_err(|e| AppError::new(2, format!("Invalid geometry in model JSON: {e}")))?;
    Ok(model)
}
