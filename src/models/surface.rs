//! Tilted paraboloid describing where best focus lies across the sensor.
//!
//! ```text
//! f(x, y) = (X'·cosφ + Y'·sinφ)·tanθ + sign(C)·C²·(X'² + Y'²) + Z0
//! X' = x − X0,  Y' = y − Y0
//! ```
//!
//! All lengths are in microns: `x`/`y` relative to the sensor center and the
//! result as a focuser position. `θ` is the tilt angle, `φ` the direction of
//! steepest ascent in the sensor plane, and `C` the signed square root of the
//! field curvature coefficient.

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::fit::{ParameterVector, check_len};

/// Fitted surface parameters, in `X0, Y0, Z0, Theta, Phi, C` order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorParaboloid {
    pub x0: f64,
    pub y0: f64,
    pub z0: f64,
    pub theta: f64,
    pub phi: f64,
    pub c: f64,
}

/// Focus offsets (microns) of the four sensor corners from the tilt term alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerTilt {
    pub top_left: f64,
    pub top_right: f64,
    pub bottom_left: f64,
    pub bottom_right: f64,
}

impl CornerTilt {
    /// Largest corner-to-corner focus difference.
    pub fn spread(&self) -> f64 {
        let values = [self.top_left, self.top_right, self.bottom_left, self.bottom_right];
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        max - min
    }
}

impl SensorParaboloid {
    /// `sign(C)·C²`, the coefficient of the radial term.
    pub fn curvature_coefficient(&self) -> f64 {
        self.c * self.c.abs()
    }

    /// Predicted best-focus position at sensor location `(x, y)`.
    pub fn value_at(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.x0;
        let dy = y - self.y0;
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        (dx * cos_phi + dy * sin_phi) * self.theta.tan()
            + self.curvature_coefficient() * (dx * dx + dy * dy)
            + self.z0
    }

    /// Tilt contribution at `(x, y)`, measured from the sensor center.
    pub fn tilt_at(&self, x: f64, y: f64) -> f64 {
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        (x * cos_phi + y * sin_phi) * self.theta.tan()
    }

    /// Curvature contribution at `(x, y)`, measured from the sensor center.
    pub fn curvature_at(&self, x: f64, y: f64) -> f64 {
        self.curvature_coefficient() * (x * x + y * y)
    }

    /// Integral of [`SensorParaboloid::value_at`] over a `width × height`
    /// rectangle centered on the sensor.
    pub fn volume(&self, width: f64, height: f64) -> f64 {
        let area = width * height;
        let k = self.curvature_coefficient();
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        k * area * (self.x0 * self.x0 + self.y0 * self.y0)
            + k * area * (width * width + height * height) / 12.0
            - area * self.theta.tan() * (self.x0 * cos_phi + self.y0 * sin_phi)
            + self.z0 * area
    }

    /// Tilt at the corners of a `width × height` sensor (y grows downward).
    pub fn corner_tilt(&self, width: f64, height: f64) -> CornerTilt {
        let (hw, hh) = (width / 2.0, height / 2.0);
        CornerTilt {
            top_left: self.tilt_at(-hw, -hh),
            top_right: self.tilt_at(hw, -hh),
            bottom_left: self.tilt_at(-hw, hh),
            bottom_right: self.tilt_at(hw, hh),
        }
    }

    /// Partial derivatives of `value_at(x, y)` in parameter order.
    pub fn gradient_at(&self, x: f64, y: f64, out: &mut [f64]) {
        let dx = x - self.x0;
        let dy = y - self.y0;
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        let tan_theta = self.theta.tan();
        let k = self.curvature_coefficient();

        out[0] = -cos_phi * tan_theta - 2.0 * k * dx;
        out[1] = -sin_phi * tan_theta - 2.0 * k * dy;
        out[2] = 1.0;
        out[3] = (dx * cos_phi + dy * sin_phi) * (1.0 + tan_theta * tan_theta);
        out[4] = (dy * cos_phi - dx * sin_phi) * tan_theta;
        out[5] = 2.0 * self.c.abs() * (dx * dx + dy * dy);
    }

    /// Tilt angle in degrees.
    pub fn theta_degrees(&self) -> f64 {
        self.theta.to_degrees()
    }

    /// Tilt direction in degrees.
    pub fn phi_degrees(&self) -> f64 {
        self.phi.to_degrees()
    }
}

impl ParameterVector for SensorParaboloid {
    const LEN: usize = 6;

    fn names() -> &'static [&'static str] {
        &["X0", "Y0", "Z0", "Theta", "Phi", "C"]
    }

    fn to_array(&self) -> Vec<f64> {
        vec![self.x0, self.y0, self.z0, self.theta, self.phi, self.c]
    }

    fn from_array(&mut self, values: &[f64]) -> Result<(), FitError> {
        check_len::<Self>(values)?;
        self.x0 = values[0];
        self.y0 = values[1];
        self.z0 = values[2];
        self.theta = values[3];
        self.phi = values[4];
        self.c = values[5];
        Ok(())
    }
}

impl std::fmt::Display for SensorParaboloid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{X0={}, Y0={}, Z0={}, Theta={}, Phi={}, C={}}}",
            self.x0, self.y0, self.z0, self.theta, self.phi, self.c
        )
    }
}
