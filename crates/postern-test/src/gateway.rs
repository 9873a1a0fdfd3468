//! TestGateway: in-process integration test harness.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;

use postern_lib::event::{EventContext, ProxyEvent, ProxyResponse};
use postern_lib::server::{self, ServeOptions};
use postern_lib::transport::{EmbeddedHandler, TransportError};
use postern_lib::{Gateway, GatewayConfig};

use crate::fakes::{MemoryParameters, MemorySecrets, ScriptedFunctions};

/// Parameter prefix the harness configures.
pub const PARAMETER_PREFIX: &str = "/apis";
/// API id of every [`TestRequest`].
pub const API_ID: &str = "api1";
/// Stage name of every [`TestRequest`].
pub const STAGE: &str = "prod";
/// Public host of every [`TestRequest`].
pub const PUBLIC_HOST: &str = "api.example.com";

/// Errors from TestGateway operations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("failed to build gateway: {0}")]
    Build(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A gateway wired to in-memory stores and scripted functions. HTTP
/// backends are real; point `backendURL` at a mock server.
pub struct TestGateway {
    gateway: Arc<Gateway>,
    pub parameters: Arc<MemoryParameters>,
    pub secrets: Arc<MemorySecrets>,
    pub functions: Arc<ScriptedFunctions>,
}

impl TestGateway {
    /// Proxy mode with route tables under [`PARAMETER_PREFIX`].
    pub fn new() -> Result<Self, TestError> {
        Self::with_config(
            GatewayConfig::default()
                .with_proxy_mode(true)
                .with_parameter_prefix(PARAMETER_PREFIX),
        )
    }

    pub fn with_config(config: GatewayConfig) -> Result<Self, TestError> {
        Self::build(config, None)
    }

    /// Filter mode around `handler`.
    pub fn embedded(handler: Arc<dyn EmbeddedHandler>) -> Result<Self, TestError> {
        Self::build(GatewayConfig::default().with_proxy_mode(false), Some(handler))
    }

    fn build(
        config: GatewayConfig,
        handler: Option<Arc<dyn EmbeddedHandler>>,
    ) -> Result<Self, TestError> {
        let parameters = Arc::new(MemoryParameters::new());
        let secrets = Arc::new(MemorySecrets::new());
        let functions = Arc::new(ScriptedFunctions::new());

        let mut builder = Gateway::builder(config)
            .with_parameter_store(parameters.clone())
            .with_secret_store(secrets.clone())
            .with_function_invoker(functions.clone());
        if let Some(handler) = handler {
            builder = builder.with_embedded_handler(handler);
        }

        Ok(Self {
            gateway: Arc::new(builder.build()?),
            parameters,
            secrets,
            functions,
        })
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Add a route entry for [`API_ID`], e.g.
    /// `route("/routes/ANY/docs/ALL/BACKEND_URL", "lambda:docs")`.
    pub fn route(&self, key: &str, backend: &str) {
        self.parameters
            .set(format!("{}/{}{}", PARAMETER_PREFIX, API_ID, key), backend);
    }

    /// Run one request through the gateway.
    pub async fn send(&self, request: TestRequest) -> TestResponse {
        TestResponse(self.gateway.handle(request.into_event()).await)
    }

    /// Serve the gateway over HTTP on a random local port. Returns the base
    /// URL. The server lives until the runtime shuts down.
    pub async fn spawn_http(&self, options: ServeOptions) -> Result<String, TestError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(server::serve_listener(
            Arc::clone(&self.gateway),
            options,
            listener,
        ));
        Ok(format!("http://{}", addr))
    }
}

/// Builder for inbound events as the hosting platform would deliver them.
#[derive(Debug, Clone)]
pub struct TestRequest {
    event: ProxyEvent,
}

impl TestRequest {
    /// A request for `path` on `https://api.example.com/prod`.
    pub fn new(method: &str, path: &str) -> Self {
        let event = ProxyEvent {
            resource: path.to_string(),
            path: path.to_string(),
            http_method: method.to_string(),
            multi_value_headers: Some(BTreeMap::from([
                ("Host".to_string(), vec![PUBLIC_HOST.to_string()]),
                ("X-Forwarded-Proto".to_string(), vec!["https".to_string()]),
                ("X-Forwarded-Port".to_string(), vec!["443".to_string()]),
            ])),
            request_context: EventContext {
                api_id: API_ID.to_string(),
                stage: STAGE.to_string(),
                resource_path: path.to_string(),
                path: format!("/{}{}", STAGE, path),
                ..EventContext::default()
            },
            ..ProxyEvent::default()
        };
        Self { event }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: &str) -> Self {
        Self::new("POST", path)
    }

    pub fn options(path: &str) -> Self {
        Self::new("OPTIONS", path)
    }

    /// Route template, e.g. `/docs/{id}`.
    pub fn resource(mut self, template: &str) -> Self {
        self.event.resource = template.to_string();
        self.event.request_context.resource_path = template.to_string();
        self
    }

    pub fn path_param(mut self, name: &str, value: &str) -> Self {
        self.event
            .path_parameters
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.event
            .multi_value_headers
            .get_or_insert_with(BTreeMap::new)
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.event
            .multi_value_query_string_parameters
            .get_or_insert_with(BTreeMap::new)
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn stage_var(mut self, name: &str, value: &str) -> Self {
        self.event
            .stage_variables
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.event.body = Some(body.to_string());
        self.event.is_base64_encoded = false;
        self
    }

    pub fn base64_body(mut self, body: &str) -> Self {
        self.event.body = Some(body.to_string());
        self.event.is_base64_encoded = true;
        self
    }

    pub fn into_event(self) -> ProxyEvent {
        self.event
    }
}

/// A response description with lookup helpers.
#[derive(Debug, Clone)]
pub struct TestResponse(pub ProxyResponse);

impl TestResponse {
    pub fn status(&self) -> u16 {
        self.0.status_code
    }

    /// All values of a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        let multi = self
            .0
            .multi_value_headers
            .iter()
            .flatten()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.clone());
        let single = || {
            self.0
                .headers
                .iter()
                .flatten()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| vec![value.clone()])
        };
        multi.or_else(single).unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.header_values(name).into_iter().next()
    }

    /// Header names, lower-cased.
    pub fn header_names(&self) -> Vec<String> {
        let multi = self.0.multi_value_headers.iter().flatten().map(|(k, _)| k);
        let single = self.0.headers.iter().flatten().map(|(k, _)| k);
        multi.chain(single).map(|k| k.to_ascii_lowercase()).collect()
    }

    pub fn body(&self) -> Option<&str> {
        self.0.body.as_deref()
    }

    /// The body parsed as JSON, `Value::Null` when absent or invalid.
    pub fn json(&self) -> Value {
        self.body()
            .and_then(|body| serde_json::from_str(body).ok())
            .unwrap_or(Value::Null)
    }

    pub fn is_base64_encoded(&self) -> bool {
        self.0.is_base64_encoded
    }
}
