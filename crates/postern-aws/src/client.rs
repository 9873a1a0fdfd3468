//! Shared plumbing: endpoint resolution and signed JSON calls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::sigv4::Signer;
use crate::{AwsError, Credentials};

/// Region, credentials and optional endpoint override shared by all clients.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub credentials: Credentials,
    /// Replaces `https://{service}.{region}.amazonaws.com` for every service.
    pub endpoint: Option<String>,
}

impl AwsConfig {
    pub fn new(region: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            region: region.into(),
            credentials,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Build from `AWS_REGION` (or `AWS_DEFAULT_REGION`), the credential
    /// variables and the optional `AWS_ENDPOINT_URL`.
    pub fn from_env() -> Result<Self, AwsError> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .map_err(|_| AwsError::MissingConfig("AWS_REGION"))?;
        let mut config = Self::new(region, Credentials::from_env()?);
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            config.endpoint = Some(endpoint);
        }
        Ok(config)
    }

    fn endpoint_for(&self, service: &str) -> Result<Url, AwsError> {
        let raw = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.{}.amazonaws.com", service, self.region),
        };
        Url::parse(&raw).map_err(|e| AwsError::InvalidEndpoint(format!("{}: {}", raw, e)))
    }
}

/// Error document returned by JSON-protocol services.
#[derive(Deserialize)]
struct ErrorDocument {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// A raw response from a signed call.
pub(crate) struct RawResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: bytes::Bytes,
}

/// A reqwest client bound to one AWS service.
#[derive(Clone)]
pub(crate) struct SignedClient {
    http: reqwest::Client,
    config: Arc<AwsConfig>,
    /// Signing name, also used as the endpoint prefix.
    service: &'static str,
}

impl SignedClient {
    pub fn new(config: Arc<AwsConfig>, service: &'static str) -> Result<Self, AwsError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AwsError::Client(e.to_string()))?;
        Ok(Self {
            http,
            config,
            service,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Endpoint URL with the given path segments appended (each encoded).
    pub fn url(&self, segments: &[&str]) -> Result<Url, AwsError> {
        let mut url = self.config.endpoint_for(self.service)?;
        if segments.is_empty() {
            return Ok(url);
        }
        let raw = url.to_string();
        url.path_segments_mut()
            .map_err(|_| AwsError::InvalidEndpoint(raw))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue a signed POST and return the raw response, whatever its status.
    pub async fn post(
        &self,
        url: Url,
        mut headers: BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<RawResponse, AwsError> {
        let signer = Signer {
            credentials: &self.config.credentials,
            region: &self.config.region,
            service: self.service,
        };
        signer.sign("POST", &url, &mut headers, &payload, Utc::now());
        // reqwest derives host from the URL itself
        headers.remove("host");

        let mut request = self.http.post(url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|source| AwsError::Transport {
                service: self.service,
                source,
            })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|source| AwsError::Transport {
                service: self.service,
                source,
            })?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    /// Call a JSON 1.1 protocol action (`X-Amz-Target`).
    pub async fn json_call<Req, Resp>(&self, target: &str, request: &Req) -> Result<Resp, AwsError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request).map_err(|e| AwsError::Decode {
            service: self.service,
            message: e.to_string(),
        })?;

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-amz-json-1.1".to_string(),
        );
        headers.insert("x-amz-target".to_string(), target.to_string());

        let url = self.url(&[])?;
        let response = self.post(url, headers, payload).await?;
        if !(200..300).contains(&response.status) {
            return Err(self.service_error(&response));
        }

        serde_json::from_slice(&response.body).map_err(|e| AwsError::Decode {
            service: self.service,
            message: e.to_string(),
        })
    }

    pub fn service_error(&self, response: &RawResponse) -> AwsError {
        let document: Option<ErrorDocument> = serde_json::from_slice(&response.body).ok();
        let (code, message) = match document {
            Some(doc) => (
                doc.kind
                    .map(|k| k.rsplit('#').next().unwrap_or_default().to_string())
                    .unwrap_or_default(),
                doc.message.unwrap_or_default(),
            ),
            None => (
                String::new(),
                String::from_utf8_lossy(&response.body).into_owned(),
            ),
        };
        AwsError::Service {
            service: self.service,
            status: response.status,
            code,
            message,
        }
    }
}
