//! Logging infrastructure for the Postern gateway.
//!
//! This crate provides:
//! - Structured JSON (or pretty) logging through `tracing-subscriber`
//! - Standard event names and logging macros
//! - Masking of sensitive values in request and response dumps
//!
//! # Usage
//!
//! ```ignore
//! use postern_telemetry::{LogFormat, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("debug")
//!     .with_log_format(LogFormat::Pretty);
//!
//! postern_telemetry::init(&config)?;
//! ```

pub mod config;
pub mod logging;
pub mod masking;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;
pub use masking::{mask_value, DumpMode};

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// Initialize logging with the given configuration.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    logging::init_logging(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "postern");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.dump_mode, DumpMode::Masked);
        assert!(!config.stderr);
    }

    #[test]
    fn test_config_builder() {
        let config = TelemetryConfig::new()
            .with_service_name("edge")
            .with_log_level("debug")
            .with_log_format(LogFormat::Pretty)
            .with_dump_mode(DumpMode::Verbatim)
            .with_stderr(true);

        assert_eq!(config.service_name, "edge");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.dump_mode, DumpMode::Verbatim);
        assert!(config.stderr);
    }
}
