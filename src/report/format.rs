//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{ModelFile, SensorGeometry};
use crate::fit::Termination;
use crate::io::ingest::IngestedData;
use crate::models::{CornerTilt, SensorParaboloid, SurfaceFit};
use crate::report::{RegionStat, SampleResidual};

/// Format the run summary (dataset stats + fit diagnostics + parameters).
pub fn format_fit_summary(ingest: &IngestedData, fit: &SurfaceFit, geometry: &SensorGeometry) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== tilt - {} ===\n", ingest.path.display()));
    out.push_str(&format!(
        "Sensor: {}x{} px @ {:.2}um ({:.1} x {:.1} mm) | {:.3}um/step\n",
        geometry.width_px,
        geometry.height_px,
        geometry.pixel_size_um,
        geometry.width_um() / 1000.0,
        geometry.height_um() / 1000.0,
        geometry.microns_per_step,
    ));
    out.push_str(&format!(
        "Rows: read={} used={} errors={} | focus=[{:.1}, {:.1}]um\n",
        ingest.rows_read,
        ingest.rows_used,
        ingest.row_errors.len(),
        ingest.stats.focus_min,
        ingest.stats.focus_max,
    ));

    out.push_str("\nFit:\n");
    out.push_str(&format!(
        "- stars in model: {} of {} ({} rejected)\n",
        fit.stars_in_model(),
        fit.diagnostics.total_count,
        fit.rejected.len()
    ));
    out.push_str(&format!("- RMS error     : {:.3}um\n", fit.rms_error_microns()));
    out.push_str(&format!("- goodness      : {:.4}\n", fit.goodness_of_fit()));
    out.push_str(&format!(
        "- solver        : {} after {} iterations\n",
        fmt_termination(fit.report.termination),
        fit.report.iterations
    ));

    out.push_str("\nSurface:\n");
    out.push_str(&format_parameters(&fit.model, geometry));

    out
}

/// Format the paraboloid parameters with human units.
pub fn format_parameters(model: &SensorParaboloid, geometry: &SensorGeometry) -> String {
    let mut out = String::new();
    out.push_str(&format!("- center (X0,Y0): ({:.1}, {:.1})um\n", model.x0, model.y0));
    out.push_str(&format!(
        "- focus at vertex: {:.2}um ({:.1} steps)\n",
        model.z0,
        geometry.microns_to_steps(model.z0)
    ));
    out.push_str(&format!(
        "- tilt           : {:.5} deg toward {:.1} deg\n",
        model.theta_degrees(),
        model.phi_degrees()
    ));
    out.push_str(&format!(
        "- curvature C    : {:.6e} (edge {:+.2}um)\n",
        model.c,
        model.curvature_at(geometry.width_um() / 2.0, 0.0)
    ));
    out
}

/// Format the tilt at the four corners, in microns and focuser steps.
pub fn format_corners(corners: &CornerTilt, geometry: &SensorGeometry) -> String {
    let cell = |v: f64| format!("{v:+9.2}um {:+8.1}st", geometry.microns_to_steps(v));
    let mut out = String::new();
    out.push_str("Corner tilt:\n");
    out.push_str(&format!("  {}    {}\n", cell(corners.top_left), cell(corners.top_right)));
    out.push_str(&format!("  {}    {}\n", cell(corners.bottom_left), cell(corners.bottom_right)));
    out.push_str(&format!("  spread: {:.2}um\n", corners.spread()));
    out
}

/// Format region offsets as a grid (offset in microns, sample count in brackets).
pub fn format_regions(stats: &[RegionStat], wide: usize) -> String {
    let mut out = String::new();
    out.push_str("Region focus offsets (um) [stars]:\n");
    for row in stats.chunks(wide.max(1)) {
        let cells: Vec<String> = row
            .iter()
            .map(|s| {
                let count = s.samples.map(|c| c.count).unwrap_or(0);
                format!("{:+8.2} [{count:>3}]", s.offset)
            })
            .collect();
        out.push_str(format!("  {}", cells.join("  ")).trim_end());
        out.push('\n');
    }
    out
}

/// Format the worst residuals.
pub fn format_largest_residuals(rows: &[SampleResidual]) -> String {
    let mut out = String::new();
    out.push_str("Largest residuals:\n");
    out.push_str(
        format!(
            "{:>6} {:>10} {:>10} {:>12} {:>12} {:>10} {:>6}\n",
            "index", "x_um", "y_um", "focus_um", "fit_um", "resid_um", "r2"
        )
        .trim_end(),
    );
    out.push('\n');
    for r in rows {
        let p = &r.point;
        out.push_str(
            format!(
                "{:>6} {:>10.1} {:>10.1} {:>12.2} {:>12.2} {:>+10.2} {:>6}\n",
                r.index,
                p.x,
                p.y,
                p.focus,
                r.fitted,
                r.residual,
                p.r_squared.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".to_string()),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Format a saved model file for `tilt eval`.
pub fn format_model_file(file: &ModelFile) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== {} model fitted {} ===\n",
        file.tool,
        file.fitted_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "stars={} rms={:.3}um goodness={:.4} solver={}\n\n",
        file.diagnostics.enabled_count,
        file.diagnostics.rms_error,
        file.diagnostics.goodness_of_fit,
        fmt_termination(file.termination)
    ));
    out.push_str(&format_parameters(&file.model, &file.geometry));
    out.push('\n');
    let g = &file.geometry;
    out.push_str(&format_corners(&file.model.corner_tilt(g.width_um(), g.height_um()), g));
    out.push_str(&format!(
        "Mean focus over sensor: {:.2}um\n",
        file.model.volume(g.width_um(), g.height_um()) / (g.width_um() * g.height_um())
    ));
    out
}

fn fmt_termination(t: Termination) -> &'static str {
    match t {
        Termination::Converged(_) => "converged",
        Termination::DidNotConverge => "iteration cap reached",
    }
}
