//! Logging setup for the `tilt` binary.
//!
//! `RUST_LOG` wins when set; otherwise `-v` flags pick the level. Logs go to
//! stderr so stdout stays clean for reports.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

/// Map `-v` occurrences to a base filter.
pub fn base_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn setup_logging(verbosity: u8) -> Result<(), AppError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(base_level(verbosity)))
        .map_err(|e| AppError::new(2, format!("Invalid log filter: {e}")))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| AppError::new(2, format!("Logger initialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(base_level(0), "warn");
        assert_eq!(base_level(1), "info");
        assert_eq!(base_level(2), "debug");
        assert_eq!(base_level(9), "trace");
    }
}
