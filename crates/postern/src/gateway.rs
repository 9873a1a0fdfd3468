//! The gateway: one inbound event in, one response out.

use std::sync::Arc;
use std::time::Duration;

use postern_aws::{AwsConfig, AwsError, LambdaClient, ParameterStoreClient, SecretsManagerClient};
use postern_telemetry::{log_request_failed, log_request_received, log_response_sent};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::context::RequestContext;
use crate::cors::CorsEngine;
use crate::error::GatewayError;
use crate::event::{ProxyEvent, ProxyResponse};
use crate::pipeline::Chain;
use crate::resolver::RouteResolver;
use crate::stores::{ParameterStore, SecretStore, Unconfigured};
use crate::tasks::{self, TaskServices};
use crate::transport::{
    EmbeddedHandler, FunctionInvoker, HttpClient, HttpClientConfig, HttpTransport, TransportError,
};

/// A configured gateway. Cheap to share behind an `Arc`.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    pre: Chain,
    integration: Chain,
    post: Chain,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Task names per phase, in execution order.
    pub fn task_names(&self) -> [Vec<&'static str>; 3] {
        [
            self.pre.task_names(),
            self.integration.task_names(),
            self.post.task_names(),
        ]
    }

    /// Run the three chains over `event` and return the response
    /// description. Never fails: errors become error responses.
    pub async fn handle(&self, event: ProxyEvent) -> ProxyResponse {
        let request_id = event
            .request_context
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %event.http_method,
            path = %event.path,
        );
        self.process(event).instrument(span).await
    }

    async fn process(&self, event: ProxyEvent) -> ProxyResponse {
        log_request_received!(
            api_id = %event.request_context.api_id,
            stage = %event.request_context.stage,
            "request received"
        );
        if let Ok(dump) = serde_json::to_value(&event) {
            debug!(event = %self.config.dump_mode.render(&dump), "inbound event");
        }

        let mut ctx = RequestContext::new(event, self.config.proxy_mode);
        let response = match self.run_chains(&mut ctx).await {
            Ok(()) => match ctx.take_final_response() {
                Some(response) => response.into_proxy(),
                None => {
                    warn!("no response produced");
                    ProxyResponse::no_content()
                }
            },
            Err(e) => {
                let (status, _) = e.classify();
                log_request_failed!(error = %e, error_debug = ?e, status = status, "request failed");
                e.to_response().into_proxy()
            }
        };

        log_response_sent!(status = response.status_code, "response sent");
        if let Ok(dump) = serde_json::to_value(&response) {
            debug!(response = %self.config.dump_mode.render(&dump), "outbound response");
        }
        response
    }

    async fn run_chains(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        self.pre.run(ctx).await?;
        if !ctx.is_answered() {
            self.integration.run(ctx).await?;
        }
        self.post.run(ctx).await?;
        Ok(())
    }
}

/// Assembles a [`Gateway`] from its collaborators. Anything not provided
/// fails as unavailable when used; the HTTP transport defaults to a pooled
/// [`HttpClient`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    parameters: Arc<dyn ParameterStore>,
    secrets: Arc<dyn SecretStore>,
    http: Option<Arc<dyn HttpTransport>>,
    functions: Arc<dyn FunctionInvoker>,
    embedded: Option<Arc<dyn EmbeddedHandler>>,
    route_ttl: Option<Duration>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            parameters: Arc::new(Unconfigured),
            secrets: Arc::new(Unconfigured),
            http: None,
            functions: Arc::new(Unconfigured),
            embedded: None,
            route_ttl: None,
        }
    }

    /// Use the AWS clients for parameters, secrets and functions.
    pub fn with_aws(self, aws: Arc<AwsConfig>) -> Result<Self, AwsError> {
        Ok(self
            .with_parameter_store(Arc::new(ParameterStoreClient::new(Arc::clone(&aws))?))
            .with_secret_store(Arc::new(SecretsManagerClient::new(Arc::clone(&aws))?))
            .with_function_invoker(Arc::new(LambdaClient::new(aws)?)))
    }

    pub fn with_parameter_store(mut self, store: Arc<dyn ParameterStore>) -> Self {
        self.parameters = store;
        self
    }

    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = store;
        self
    }

    pub fn with_http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    pub fn with_function_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.functions = invoker;
        self
    }

    pub fn with_embedded_handler(mut self, handler: Arc<dyn EmbeddedHandler>) -> Self {
        self.embedded = Some(handler);
        self
    }

    /// Override the route table lifetime.
    pub fn with_route_ttl(mut self, ttl: Duration) -> Self {
        self.route_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Result<Gateway, TransportError> {
        if self.config.allow_mocking {
            warn!("mocking is allowed; mock responses echo request headers");
        }

        let http = match self.http {
            Some(http) => http,
            None => Arc::new(HttpClient::new(HttpClientConfig::default())?),
        };
        let mut resolver = RouteResolver::new(self.parameters, self.config.parameter_prefix.clone());
        if let Some(ttl) = self.route_ttl {
            resolver = resolver.with_ttl(ttl);
        }

        let config = Arc::new(self.config);
        let services = TaskServices {
            config: Arc::clone(&config),
            resolver,
            cors: CorsEngine::new(),
            secrets: self.secrets,
            http,
            functions: self.functions,
            embedded: self.embedded,
        };

        Ok(Gateway {
            pre: tasks::pre_integration_chain(&services),
            integration: tasks::integration_chain(&services),
            post: tasks::post_integration_chain(),
            config,
        })
    }
}
