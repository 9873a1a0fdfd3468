//! Error types for the AWS clients.

use thiserror::Error;

/// Errors raised by the AWS clients.
#[derive(Debug, Error)]
pub enum AwsError {
    /// Required configuration (credentials, region) is missing.
    #[error("missing AWS configuration: {0}")]
    MissingConfig(&'static str),

    /// The endpoint URL could not be parsed or extended.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The request never produced a response.
    #[error("request to {service} failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with an error document.
    #[error("{service} returned {status} {code}: {message}")]
    Service {
        service: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {service}: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}
