//! Per-request execution context shared by every pipeline task.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::GatewayError;
use crate::event::{GatewayResponse, ProxyEvent};
use crate::headers::Headers;
use crate::rewrite::ReplacePattern;
use crate::transport::InboundResponse;

/// Prefix marking a function backend address.
pub const FUNCTION_PREFIX: &str = "lambda:";

/// Host used in place of a real backend host for function targets.
pub const FUNCTION_PSEUDO_HOST: &str = "function.postern.internal";

/// Where a request is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendTarget {
    /// Not resolved yet.
    #[default]
    Unresolved,
    /// An HTTP base URL.
    Http(String),
    /// A named callable function.
    Function(String),
    /// The in-process handler (filter mode).
    Embedded,
}

impl BackendTarget {
    /// Classify a configured or resolved backend address.
    pub fn from_address(address: &str) -> Result<Self, GatewayError> {
        match address.strip_prefix(FUNCTION_PREFIX) {
            Some("") => Err(GatewayError::InvalidFunctionName(address.to_string())),
            Some(name) => Ok(Self::Function(name.to_string())),
            None => Ok(Self::Http(address.to_string())),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// Base URL used for rewriting. Function and embedded targets get the
    /// pseudo host.
    pub fn base_url(&self) -> Option<String> {
        match self {
            Self::Unresolved => None,
            Self::Http(url) => Some(url.trim_end_matches('/').to_string()),
            Self::Function(_) | Self::Embedded => Some(format!("https://{}", FUNCTION_PSEUDO_HOST)),
        }
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved => f.write_str("unresolved"),
            Self::Http(url) => f.write_str(url),
            Self::Function(name) => write!(f, "{}{}", FUNCTION_PREFIX, name),
            Self::Embedded => f.write_str("embedded"),
        }
    }
}

/// Stage configuration relevant to the pipeline, read once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSettings {
    pub backend_url: Option<String>,
    pub rewrite_all_backend_urls: bool,
    pub forward_x_forwarded: bool,
    pub skip_body_rewrite: bool,
    pub mock: bool,
    pub client_key_secret: Option<String>,
    pub client_certificate_secret: Option<String>,
}

impl StageSettings {
    pub fn from_event(event: &ProxyEvent) -> Self {
        let flag = |name: &str| event.stage_variable(name) == Some("true");
        let value = |name: &str| {
            event
                .stage_variable(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            backend_url: value("backendURL"),
            rewrite_all_backend_urls: flag("rewriteAllBackendURLs"),
            forward_x_forwarded: flag("forwardXForwarded"),
            skip_body_rewrite: flag("skipBodyRewrite"),
            mock: flag("mock"),
            client_key_secret: value("backendHttpsClientKeySecret"),
            client_certificate_secret: value("backendHttpsClientCertificateSecret"),
        }
    }
}

/// Public and backend addressing for the current request.
#[derive(Debug, Clone)]
pub struct UrlInfo {
    /// Public URL prefix in front of the resource path.
    pub api_url: String,
    /// Backend base URL (pseudo URL for function targets).
    pub backend_url: String,
    /// Route template with path parameters substituted.
    pub resource_path: String,
    /// Path part of `api_url`.
    pub frontend_prefix: String,
    /// Path part of `backend_url`.
    pub backend_prefix: String,
    /// Matches the public URL.
    pub api_pattern: ReplacePattern,
    /// Matches the backend URL.
    pub backend_pattern: ReplacePattern,
    /// Matches the backend path under any host.
    pub backend_any_host_pattern: ReplacePattern,
}

/// The rewritten request sent to the backend.
#[derive(Debug, Clone, Default)]
pub struct BackendRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

/// Result of the CORS engine for this request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorsOutcome {
    /// Enforcement off or no `Origin` header.
    #[default]
    NotApplied,
    /// Origin allowed; headers were added.
    Allowed,
    /// Origin not allowed.
    Rejected,
}

/// Timing marks.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub started_at: Instant,
    pub call_started_at: Option<Instant>,
    pub call_finished_at: Option<Instant>,
}

impl Timing {
    fn start() -> Self {
        Self {
            started_at: Instant::now(),
            call_started_at: None,
            call_finished_at: None,
        }
    }

    /// Backend call duration, zero if no call was made.
    pub fn backend(&self) -> Duration {
        match (self.call_started_at, self.call_finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Time spent in the gateway itself.
    pub fn proxy_overhead(&self) -> Duration {
        self.started_at.elapsed().saturating_sub(self.backend())
    }
}

/// Mutable state threaded through the pipeline.
///
/// Read by everyone: `event`, `normalized_headers`, `stage`, `is_proxy_mode`.
/// Written by the resolver tasks: `backend`. By `url-info`: `url_info`.
/// By `cors`: `cors`, `additional_response_headers`. By `custom-headers`:
/// `custom_headers`. By `prepare-call`: `backend_request`. By
/// `integration-event`: `integration_event`. By the invokers:
/// `backend_response`, `timing`. The chain executor owns `final_response`.
#[derive(Debug)]
pub struct RequestContext {
    pub event: ProxyEvent,
    pub normalized_headers: Headers,
    pub stage: StageSettings,
    pub is_proxy_mode: bool,
    backend: BackendTarget,
    pub url_info: Option<UrlInfo>,
    pub cors: CorsOutcome,
    pub additional_response_headers: Headers,
    pub custom_headers: Headers,
    backend_request: Option<BackendRequest>,
    pub integration_event: Option<ProxyEvent>,
    pub backend_response: Option<InboundResponse>,
    final_response: Option<GatewayResponse>,
    pub timing: Timing,
}

impl RequestContext {
    pub fn new(event: ProxyEvent, is_proxy_mode: bool) -> Self {
        let normalized_headers = Headers::canonical(
            event.headers.as_ref(),
            event.multi_value_headers.as_ref(),
        );
        let stage = StageSettings::from_event(&event);
        Self {
            event,
            normalized_headers,
            stage,
            is_proxy_mode,
            backend: BackendTarget::Unresolved,
            url_info: None,
            cors: CorsOutcome::NotApplied,
            additional_response_headers: Headers::new(),
            custom_headers: Headers::new(),
            backend_request: None,
            integration_event: None,
            backend_response: None,
            final_response: None,
            timing: Timing::start(),
        }
    }

    pub fn backend(&self) -> &BackendTarget {
        &self.backend
    }

    /// Record the backend target. Allowed once, before any response exists.
    pub fn set_backend(&mut self, target: BackendTarget) -> Result<(), GatewayError> {
        if self.final_response.is_some() || self.backend.is_resolved() {
            return Err(GatewayError::BackendAlreadySet);
        }
        self.backend = target;
        Ok(())
    }

    pub fn backend_request(&self) -> Option<&BackendRequest> {
        self.backend_request.as_ref()
    }

    pub fn set_backend_request(&mut self, request: BackendRequest) -> Result<(), GatewayError> {
        if self.final_response.is_some() {
            return Err(GatewayError::ResponseAlreadySet);
        }
        self.backend_request = Some(request);
        Ok(())
    }

    pub fn final_response(&self) -> Option<&GatewayResponse> {
        self.final_response.as_ref()
    }

    /// Mutable access for post-integration normalization.
    pub fn final_response_mut(&mut self) -> Option<&mut GatewayResponse> {
        self.final_response.as_mut()
    }

    pub fn is_answered(&self) -> bool {
        self.final_response.is_some()
    }

    /// Record the final response. Allowed once.
    pub fn answer(&mut self, response: GatewayResponse) -> Result<(), GatewayError> {
        if self.final_response.is_some() {
            return Err(GatewayError::ResponseAlreadySet);
        }
        self.final_response = Some(response);
        Ok(())
    }

    pub fn take_final_response(&mut self) -> Option<GatewayResponse> {
        self.final_response.take()
    }

    /// Origin header of the inbound request.
    pub fn origin(&self) -> Option<&str> {
        self.normalized_headers.first("origin")
    }

    /// Method in upper case.
    pub fn method(&self) -> String {
        self.event.http_method.to_uppercase()
    }
}
