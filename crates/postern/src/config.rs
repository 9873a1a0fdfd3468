//! Process-level gateway configuration.

use clap::Args;
use postern_telemetry::DumpMode;

use crate::rewrite::RewriteStrategy;
use crate::urls::DEFAULT_HOST;

/// Flags shared by every command, each with an environment fallback.
#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    /// Forward to configured backends instead of wrapping an embedded handler.
    #[arg(long, env = "WRAPPER_PROXY_MODE")]
    pub proxy_mode: bool,

    /// Parameter store prefix under which route tables live.
    #[arg(long, env = "SSM_PARAMETER_PREFIX")]
    pub parameter_prefix: Option<String>,

    /// Allow stages to answer from the mock.
    #[arg(long, env = "ALLOW_MOCKING")]
    pub allow_mocking: bool,

    /// Rewrite structured values by serializing them first.
    #[arg(long, env = "USE_STRING_REPLACE")]
    pub use_string_replace: bool,

    /// Log request and response dumps without masking.
    #[arg(long, env = "ENABLE_LOGGING_DEBUG")]
    pub enable_logging_debug: bool,

    /// Host used to build the public URL when the request has none.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub default_host: String,
}

/// Resolved gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub proxy_mode: bool,
    pub parameter_prefix: Option<String>,
    pub allow_mocking: bool,
    pub rewrite: RewriteStrategy,
    pub dump_mode: DumpMode,
    pub default_host: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            proxy_mode: true,
            parameter_prefix: None,
            allow_mocking: false,
            rewrite: RewriteStrategy::Structural,
            dump_mode: DumpMode::Masked,
            default_host: DEFAULT_HOST.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn with_proxy_mode(mut self, proxy_mode: bool) -> Self {
        self.proxy_mode = proxy_mode;
        self
    }

    pub fn with_parameter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.parameter_prefix = Some(prefix.into());
        self
    }

    pub fn with_allow_mocking(mut self, allow: bool) -> Self {
        self.allow_mocking = allow;
        self
    }

    pub fn with_rewrite(mut self, rewrite: RewriteStrategy) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }
}

impl From<&GatewayArgs> for GatewayConfig {
    fn from(args: &GatewayArgs) -> Self {
        Self {
            proxy_mode: args.proxy_mode,
            parameter_prefix: args.parameter_prefix.clone().filter(|p| !p.is_empty()),
            allow_mocking: args.allow_mocking,
            rewrite: RewriteStrategy::from_flag(args.use_string_replace),
            dump_mode: if args.enable_logging_debug {
                DumpMode::Verbatim
            } else {
                DumpMode::Masked
            },
            default_host: args.default_host.clone(),
        }
    }
}
