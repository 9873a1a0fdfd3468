//! Telemetry configuration.

use crate::masking::DumpMode;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON output (production).
    #[default]
    Json,
    /// Human-readable pretty output (development).
    Pretty,
}

impl LogFormat {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup events (default: "postern").
    pub service_name: String,

    /// Log level filter (default: "info").
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// How request and response dumps are rendered.
    pub dump_mode: DumpMode,

    /// Write logs to stderr instead of stdout.
    pub stderr: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "postern".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            dump_mode: DumpMode::Masked,
            stderr: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new telemetry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the log level.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the log format.
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Set the dump mode.
    pub fn with_dump_mode(mut self, mode: DumpMode) -> Self {
        self.dump_mode = mode;
        self
    }

    /// Log to stderr, keeping stdout for command output.
    pub fn with_stderr(mut self, stderr: bool) -> Self {
        self.stderr = stderr;
        self
    }
}
