//! Backend transports: HTTP calls and function invocations.
//!
//! Every status code a backend returns is a normal response; a
//! [`TransportError`] means no response was obtained at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use postern_aws::LambdaClient;
use reqwest::{Client, Identity};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::{ProxyEvent, ProxyResponse};
use crate::headers::Headers;
use crate::stores::Unconfigured;

/// PEM material for mutual TLS towards a backend.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub certificate_pem: String,
    pub key_pem: String,
}

impl ClientIdentity {
    /// Digest used to reuse one client per identity.
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.certificate_pem.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.key_pem.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// A request to an HTTP backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    /// One entry per header line.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub identity: Option<ClientIdentity>,
}

/// A response from an HTTP backend.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    /// `None` when the backend sent no body.
    pub body: Option<Bytes>,
}

/// Result of a function invocation that reached the function.
#[derive(Debug, Clone)]
pub struct FunctionResult {
    pub payload: Bytes,
    /// Set when the function itself failed.
    pub function_error: Option<String>,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    BuildError(#[source] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("failed to parse client identity: {0}")]
    Identity(#[source] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("failed to read response body: {0}")]
    ResponseReadError(#[source] reqwest::Error),

    #[error("invocation failed: {0}")]
    Invocation(String),
}

/// Sends requests to HTTP backends.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError>;
}

/// Invokes named functions synchronously.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<FunctionResult, TransportError>;
}

/// In-process target used in filter mode.
#[async_trait]
pub trait EmbeddedHandler: Send + Sync {
    async fn handle(&self, event: ProxyEvent) -> ProxyResponse;
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout.
    pub pool_idle_timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Pooled reqwest client, with one extra client per mutual-TLS identity.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    identity_clients: Arc<RwLock<HashMap<String, Client>>>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, TransportError> {
        let client = Self::builder(&config)
            .build()
            .map_err(TransportError::BuildError)?;
        Ok(Self {
            client,
            identity_clients: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    fn builder(config: &HttpClientConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            // backend redirects go back to the caller, rewritten
            .redirect(reqwest::redirect::Policy::none())
    }

    fn client_for(&self, identity: &ClientIdentity) -> Result<Client, TransportError> {
        let key = identity.fingerprint();
        if let Some(client) = self.identity_clients.read().get(&key) {
            return Ok(client.clone());
        }

        let mut pem = identity.certificate_pem.clone().into_bytes();
        pem.push(b'\n');
        pem.extend_from_slice(identity.key_pem.as_bytes());
        let client = Self::builder(&self.config)
            .identity(Identity::from_pem(&pem).map_err(TransportError::Identity)?)
            .build()
            .map_err(TransportError::BuildError)?;

        self.identity_clients.write().insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let url = request
            .url
            .parse::<reqwest::Url>()
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", request.url, e)))?;
        let method = request
            .method
            .parse::<reqwest::Method>()
            .map_err(|e| TransportError::InvalidMethod(e.to_string()))?;

        let client = match &request.identity {
            Some(identity) => self.client_for(identity)?,
            None => self.client.clone(),
        };

        let mut builder = client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::ConnectionFailed(e.to_string())
            } else {
                TransportError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let body = response
            .bytes()
            .await
            .map_err(TransportError::ResponseReadError)?;

        Ok(InboundResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: (!body.is_empty()).then_some(body),
        })
    }
}

#[async_trait]
impl FunctionInvoker for LambdaClient {
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<FunctionResult, TransportError> {
        let invocation = LambdaClient::invoke(self, name, payload)
            .await
            .map_err(|e| TransportError::Invocation(e.to_string()))?;
        Ok(FunctionResult {
            payload: invocation.payload,
            function_error: invocation.function_error,
        })
    }
}

#[async_trait]
impl FunctionInvoker for Unconfigured {
    async fn invoke(&self, name: &str, _payload: Vec<u8>) -> Result<FunctionResult, TransportError> {
        Err(TransportError::Invocation(format!(
            "cannot invoke {}: no AWS configuration",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpClientConfig::default();
        assert_eq!(config.pool_max_idle_per_host, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_identity_fingerprint_is_stable_and_distinct() {
        let a = ClientIdentity {
            certificate_pem: "cert-a".into(),
            key_pem: "key".into(),
        };
        let b = ClientIdentity {
            certificate_pem: "cert-b".into(),
            key_pem: "key".into(),
        };
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert!(!format!("{:?}", a).contains("key"));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let err = client
            .send(OutboundRequest {
                method: "GET".into(),
                url: "not a url".into(),
                headers: Vec::new(),
                body: None,
                identity: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_bad_identity_rejected() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let err = client
            .send(OutboundRequest {
                method: "GET".into(),
                url: "https://backend.invalid/".into(),
                headers: Vec::new(),
                body: None,
                identity: Some(ClientIdentity {
                    certificate_pem: "garbage".into(),
                    key_pem: "garbage".into(),
                }),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Identity(_)));
    }
}
