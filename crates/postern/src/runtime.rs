//! AWS Lambda runtime API loop.
//!
//! Polls the runtime API for the next event, runs it through the gateway
//! and posts the response back. Events that are not proxy events are
//! reported as invocation errors.

use bytes::Bytes;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info_span, Instrument};

use crate::event::{ProxyEvent, ProxyResponse};
use crate::gateway::Gateway;

/// Environment variable carrying the runtime API host and port.
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";

/// Runtime API errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `AWS_LAMBDA_RUNTIME_API` is not set.
    #[error("AWS_LAMBDA_RUNTIME_API is not set")]
    MissingEndpoint,

    /// The runtime API could not be reached.
    #[error("runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The runtime API answered with an unexpected status.
    #[error("runtime API returned {status} for {url}")]
    Status { status: u16, url: String },

    /// The next invocation carried no request id.
    #[error("invocation without a request id")]
    MissingRequestId,
}

/// One pending invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub payload: Bytes,
}

/// Client for the runtime API.
#[derive(Debug, Clone)]
pub struct LambdaRuntime {
    client: reqwest::Client,
    base: String,
}

impl LambdaRuntime {
    /// `api` is `host:port` as found in the environment, or a full base URL.
    pub fn new(api: &str) -> Self {
        let api = api.trim_end_matches('/');
        let base = if api.starts_with("http://") || api.starts_with("https://") {
            format!("{}/{}/runtime", api, API_VERSION)
        } else {
            format!("http://{}/{}/runtime", api, API_VERSION)
        };
        Self {
            // no timeout: `next` long-polls
            client: reqwest::Client::new(),
            base,
        }
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        let api = std::env::var(RUNTIME_API_ENV).map_err(|_| RuntimeError::MissingEndpoint)?;
        Ok(Self::new(&api))
    }

    /// Wait for the next invocation.
    pub async fn next(&self) -> Result<Invocation, RuntimeError> {
        let url = format!("{}/invocation/next", self.base);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let payload = response.bytes().await?;
        Ok(Invocation {
            request_id,
            payload,
        })
    }

    /// Post the response for `request_id`.
    pub async fn respond(
        &self,
        request_id: &str,
        response: &ProxyResponse,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{}/response", self.base, request_id);
        self.post(url, serde_json::to_vec(response).unwrap_or_default())
            .await
    }

    /// Report an invocation that could not be processed.
    pub async fn report_error(
        &self,
        request_id: &str,
        kind: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{}/error", self.base, request_id);
        let body = json!({ "errorMessage": message, "errorType": kind });
        self.post(url, body.to_string().into_bytes()).await
    }

    async fn post(&self, url: String, body: Vec<u8>) -> Result<(), RuntimeError> {
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(())
    }

    /// Process exactly one invocation.
    pub async fn run_once(&self, gateway: &Gateway) -> Result<(), RuntimeError> {
        let invocation = self.next().await?;
        let span = info_span!("invocation", aws_request_id = %invocation.request_id);
        async {
            match serde_json::from_slice::<ProxyEvent>(&invocation.payload) {
                Ok(mut event) => {
                    if event.request_context.request_id.is_none() {
                        event.request_context.request_id = Some(invocation.request_id.clone());
                    }
                    let response = gateway.handle(event).await;
                    self.respond(&invocation.request_id, &response).await
                }
                Err(e) => {
                    error!(error = %e, "invocation payload is not a proxy event");
                    self.report_error(&invocation.request_id, "InvalidEvent", &e.to_string())
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Process invocations until the runtime API becomes unreachable.
    pub async fn run(&self, gateway: &Gateway) -> Result<(), RuntimeError> {
        loop {
            match self.run_once(gateway).await {
                Ok(()) => debug!("invocation answered"),
                Err(e @ RuntimeError::Status { .. }) => {
                    error!(error = %e, "runtime API rejected a call");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::tasks::testing::RecordingTransport;
    use crate::transport::InboundResponse;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway() -> Gateway {
        let transport = RecordingTransport::new(InboundResponse {
            status: 200,
            status_text: "OK".into(),
            headers: Default::default(),
            body: None,
        });
        Gateway::builder(GatewayConfig::default())
            .with_http_transport(Arc::new(transport))
            .build()
            .unwrap()
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            LambdaRuntime::new("127.0.0.1:9001").base,
            "http://127.0.0.1:9001/2018-06-01/runtime"
        );
        assert_eq!(
            LambdaRuntime::new("http://localhost:9001/").base,
            "http://localhost:9001/2018-06-01/runtime"
        );
    }

    #[tokio::test]
    async fn test_invocation_answered() {
        let server = MockServer::start().await;
        let event = json!({
            "httpMethod": "GET",
            "path": "/items",
            "resource": "/items",
            "headers": {"Host": "api.example.com"},
            "stageVariables": {"backendURL": "http://items.internal"},
            "requestContext": {"apiId": "a1", "stage": "v1", "resourcePath": "/items", "path": "/v1/items"}
        });
        Mock::given(method("GET"))
            .and(path("/2018-06-01/runtime/invocation/next"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(REQUEST_ID_HEADER, "req-1")
                    .set_body_json(event),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2018-06-01/runtime/invocation/req-1/response"))
            .and(body_partial_json(json!({"statusCode": 200})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        LambdaRuntime::new(&server.uri())
            .run_once(&gateway())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_event_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2018-06-01/runtime/invocation/next"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(REQUEST_ID_HEADER, "req-2")
                    .set_body_string("not json"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2018-06-01/runtime/invocation/req-2/error"))
            .and(body_partial_json(json!({"errorType": "InvalidEvent"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        LambdaRuntime::new(&server.uri())
            .run_once(&gateway())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2018-06-01/runtime/invocation/next"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let err = LambdaRuntime::new(&server.uri()).next().await.unwrap_err();
        assert!(matches!(err, RuntimeError::MissingRequestId));
    }
}
