//! Structured logging with JSON output.
//!
//! Implements 12-factor app logging: structured JSON to stdout.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let writer = if config.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    match config.log_format {
        LogFormat::Json => init_json_logging(filter, writer),
        LogFormat::Pretty => init_pretty_logging(filter, writer),
    }
}

/// Initialize JSON logging for production.
fn init_json_logging(filter: EnvFilter, writer: BoxMakeWriter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Initialize pretty logging for development.
fn init_pretty_logging(filter: EnvFilter, writer: BoxMakeWriter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Standard log event names.
pub mod events {
    /// Gateway is starting up.
    pub const STARTUP: &str = "startup";

    /// Gateway is listening on a port.
    pub const LISTENING: &str = "listening";

    /// Inbound request received (dump).
    pub const REQUEST_RECEIVED: &str = "request_received";

    /// Response handed back to the entry point (dump).
    pub const RESPONSE_SENT: &str = "response_sent";

    /// A task failed and the request was answered with an error.
    pub const REQUEST_FAILED: &str = "request_failed";

    /// Origin did not match the CORS policy.
    pub const CORS_ORIGIN_REJECTED: &str = "cors_origin_rejected";

    /// A custom header fell back to a sentinel value.
    pub const HEADER_DEGRADED: &str = "header_degraded";

    /// Backend call or function invocation failed.
    pub const BACKEND_CALL_FAILED: &str = "backend_call_failed";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_received {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::REQUEST_RECEIVED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_response_sent {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::RESPONSE_SENT,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::REQUEST_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_cors_origin_rejected {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::CORS_ORIGIN_REJECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_header_degraded {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::HEADER_DEGRADED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_backend_call_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::BACKEND_CALL_FAILED,
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process,
    // so these tests stick to the configuration logic.

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("PRETTY"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("invalid"), None);
    }
}
