//! Gateway error types and their client-facing mapping.

use thiserror::Error;

use crate::event::GatewayResponse;
use crate::stores::StoreError;
use crate::transport::TransportError;

/// Errors that abort a request.
///
/// The `Display` text doubles as the phrase looked up in the status table
/// when the error reaches the entry point.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No backend is configured and none could be resolved.
    #[error("Missing backendURL")]
    MissingBackend,

    /// No route entry matched the request.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// A `lambda:` backend address without a function name.
    #[error("invalid lambda name in backendURL value {0}")]
    InvalidFunctionName(String),

    /// The backend address is not a usable URL.
    #[error("invalid backendURL value {0}")]
    InvalidBackendUrl(String),

    /// The route table could not be fetched.
    #[error("Invalid configuration")]
    RouteTable(#[source] StoreError),

    /// The backend client certificate or key could not be fetched.
    #[error("backend client identity unavailable")]
    ClientIdentity(#[source] StoreError),

    /// The HTTP backend could not be reached.
    #[error("backend request failed")]
    Transport(#[from] TransportError),

    /// A rewrite pattern could not be compiled.
    #[error("invalid rewrite pattern")]
    Pattern(#[from] regex_lite::Error),

    /// A second task tried to set the backend target.
    #[error("backend already set")]
    BackendAlreadySet,

    /// A second task tried to answer an already answered request.
    #[error("final response already set")]
    ResponseAlreadySet,

    /// The inbound request is unusable.
    #[error("bad request")]
    BadRequest(String),
}

/// Phrase to status table for errors surfaced to the caller.
const STATUS_PHRASES: &[(&str, u16)] = &[
    ("bad request", 400),
    ("unauthorized", 401),
    ("payment required", 402),
    ("forbidden", 403),
    ("not found", 404),
    ("method not allowed", 405),
    ("not acceptable", 406),
    ("proxy authentication required", 407),
    ("request timeout", 408),
    ("conflict", 409),
    ("gone", 410),
    ("length required", 411),
    ("precondition failed", 412),
    ("request entity too large", 413),
    ("request-uri too long", 414),
    ("unsupported media type", 415),
    ("requested range not satisfiable", 416),
    ("expectation failed", 417),
    ("insufficient space on resource", 419),
    ("method failure", 420),
    ("unprocessable entity", 422),
    ("locked", 423),
    ("failed dependency", 424),
    ("precondition required", 428),
    ("too many requests", 429),
    ("request header fields too large", 431),
    ("server error", 500),
    ("not implemented", 501),
    ("bad gateway", 502),
    ("service unavailable", 503),
    ("gateway timeout", 504),
    ("http version not supported", 505),
    ("insufficient storage", 507),
    ("network authentication required", 511),
];

/// Status code for a phrase, ignoring case.
pub fn status_for_phrase(phrase: &str) -> Option<u16> {
    STATUS_PHRASES
        .iter()
        .find(|(p, _)| p.eq_ignore_ascii_case(phrase))
        .map(|(_, status)| *status)
}

impl GatewayError {
    /// Status and public message. Anything that maps to 500 is reported as
    /// "Server Error" so internal detail never leaks.
    pub fn classify(&self) -> (u16, String) {
        let phrase = self.to_string();
        match status_for_phrase(&phrase) {
            Some(status) if status != 500 => (status, phrase),
            _ => (500, "Server Error".to_string()),
        }
    }

    /// The JSON error response sent to the caller.
    pub fn to_response(&self) -> GatewayResponse {
        let (status, message) = self.classify();
        GatewayResponse::new(status)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({ "errorMessage": message }).to_string())
    }
}
