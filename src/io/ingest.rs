//! CSV ingest and normalization.
//!
//! Turns a star-measurement CSV into sensor samples that are safe to fit.
//!
//! Expected columns (case-insensitive, any order):
//! - `x`, `y`: star position in pixels (origin top-left)
//! - `focus`: best-focus focuser position in steps
//! - `r2` (optional, alias `r_squared`): R² of the star's focus curve
//! - `enabled` (optional): `true/false`, `1/0`, `yes/no`
//!
//! Design goals:
//! - **Strict schema** for required fields (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Separation of concerns**: no fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{DatasetStats, SensorGeometry, SensorPoint};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: normalized samples + stats + row errors.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub path: PathBuf,
    pub points: Vec<SensorPoint>,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Load a sample CSV from disk.
pub fn load_sensor_points(path: &Path, geometry: &SensorGeometry) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    let mut data = read_sensor_points(file, geometry)
        .map_err(|e| AppError::new(e.exit_code(), format!("{}: {e}", path.display())))?;
    data.path = path.to_path_buf();
    Ok(data)
}

/// Parse samples from any CSV reader, converting pixels/steps to centered microns.
pub fn read_sensor_points<R: Read>(reader: R, geometry: &SensorGeometry) -> Result<IngestedData, AppError> {
    geometry
        .validate()
        .map_err(|e| AppError::new(2, format!("Invalid sensor geometry: {e}")))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for name in ["x", "y", "focus"] {
        if !header_map.contains_key(name) {
            return Err(AppError::new(2, format!("Missing required column: `{name}`")));
        }
    }

    let mut points = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map, geometry) {
            Ok(point) => points.push(point),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    for err in &row_errors {
        warn!(line = err.line, "{}", err.message);
    }

    let rows_used = points.len();
    let stats = DatasetStats::from_points(&points)
        .ok_or_else(|| AppError::new(3, "No enabled samples remain after parsing."))?;
    debug!(rows_read, rows_used, enabled = stats.n_enabled, "ingested samples");

    Ok(IngestedData {
        path: PathBuf::new(),
        points,
        stats,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    match name.to_ascii_lowercase().as_str() {
        "r_squared" | "rsquared" | "r²" => "r2".to_string(),
        other => other.to_string(),
    }
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    geometry: &SensorGeometry,
) -> Result<SensorPoint, String> {
    let x_px = parse_required(record, header_map, "x")?;
    let y_px = parse_required(record, header_map, "y")?;
    let focus_steps = parse_required(record, header_map, "focus")?;

    let r_squared = match get_optional(record, header_map, "r2") {
        Some(s) => Some(parse_f64(s).ok_or_else(|| format!("Invalid `r2` value '{s}'."))?),
        None => None,
    };
    let enabled = match get_optional(record, header_map, "enabled") {
        Some(s) => parse_bool(s).ok_or_else(|| format!("Invalid `enabled` value '{s}'."))?,
        None => true,
    };

    let (x, y) = geometry.pixel_to_sensor(x_px, y_px);
    Ok(SensorPoint {
        x,
        y,
        focus: geometry.steps_to_microns(focus_steps),
        r_squared,
        enabled,
    })
}

fn parse_required(record: &StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Result<f64, String> {
    let s = get_optional(record, header_map, name).ok_or_else(|| format!("Missing required value: `{name}`"))?;
    parse_f64(s).ok_or_else(|| format!("Invalid `{name}` value '{s}'."))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str) -> Option<f64> {
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> SensorGeometry {
        SensorGeometry {
            width_px: 4000,
            height_px: 3000,
            pixel_size_um: 4.0,
            microns_per_step: 2.0,
        }
    }

    #[test]
    fn converts_pixels_and_steps() {
        let csv = "X,Y,Focus,R_Squared\n2000,1500,1000,0.95\n0,0,1010,0.9\n";
        let data = read_sensor_points(csv.as_bytes(), &geometry()).unwrap();
        assert_eq!(data.rows_used, 2);
        assert!(data.row_errors.is_empty());

        let p = &data.points[0];
        assert_eq!((p.x, p.y, p.focus), (0.0, 0.0, 2000.0));
        assert_eq!(p.r_squared, Some(0.95));

        let q = &data.points[1];
        assert_eq!((q.x, q.y), (-8000.0, -6000.0));
        assert_eq!(data.stats.focus_max, 2020.0);
    }

    #[test]
    fn bad_rows_are_reported_not_fatal() {
        let csv = "x,y,focus,enabled\n1,2,3,true\n1,,3,true\n1,2,abc,true\n4,5,6,maybe\n7,8,9,0\n";
        let data = read_sensor_points(csv.as_bytes(), &geometry()).unwrap();
        assert_eq!(data.rows_read, 5);
        assert_eq!(data.rows_used, 2);
        let lines: Vec<usize> = data.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 5]);
        assert!(!data.points[1].enabled);
        assert_eq!(data.stats.n_enabled, 1);
    }

    #[test]
    fn missing_column_is_a_usage_error() {
        let err = read_sensor_points("x,y\n1,2\n".as_bytes(), &geometry()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("focus"));
    }

    #[test]
    fn all_disabled_is_an_error() {
        let err = read_sensor_points("x,y,focus,enabled\n1,2,3,no\n".as_bytes(), &geometry()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn bom_prefixed_header_is_accepted() {
        let csv = "\u{feff}x,y,focus\n1,2,3\n";
        let data = read_sensor_points(csv.as_bytes(), &geometry()).unwrap();
        assert_eq!(data.rows_used, 1);
    }
}
