//! Backend invocation and raw response formatting.

use std::sync::Arc;

use async_trait::async_trait;
use postern_telemetry::{log_backend_call_failed, DumpMode};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::body::{decode_body, encode_body};
use crate::context::{BackendTarget, RequestContext};
use crate::error::GatewayError;
use crate::event::{GatewayResponse, ProxyEvent, ProxyResponse};
use crate::headers::Headers;
use crate::pipeline::{ChainSignal, Task};
use crate::stores::SecretStore;
use crate::transport::{
    ClientIdentity, EmbeddedHandler, FunctionInvoker, HttpTransport, OutboundRequest,
};

/// The bare 500 used when a function backend fails.
fn backend_failure() -> GatewayResponse {
    GatewayResponse::new(500)
}

fn integration_event(ctx: &RequestContext) -> Result<ProxyEvent, GatewayError> {
    ctx.integration_event
        .clone()
        .ok_or_else(|| GatewayError::BadRequest("no integration event".into()))
}

/// Hands the request to the in-process handler (filter mode).
pub struct CallEmbedded {
    handler: Option<Arc<dyn EmbeddedHandler>>,
}

impl CallEmbedded {
    pub fn new(handler: Option<Arc<dyn EmbeddedHandler>>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Task for CallEmbedded {
    fn name(&self) -> &'static str {
        "call-embedded"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        if ctx.backend() != &BackendTarget::Embedded {
            return Ok(ChainSignal::Continue);
        }
        let Some(handler) = &self.handler else {
            error!("filter mode without an embedded handler; enable proxy mode or register a handler");
            return Ok(ChainSignal::Done(backend_failure()));
        };

        let event = integration_event(ctx)?;
        ctx.timing.call_started_at = Some(Instant::now());
        let response = handler.handle(event).await;
        ctx.timing.call_finished_at = Some(Instant::now());

        Ok(ChainSignal::Done(GatewayResponse::from_proxy(response)))
    }
}

/// Invokes a function backend synchronously with the integration event.
pub struct CallFunction {
    invoker: Arc<dyn FunctionInvoker>,
}

impl CallFunction {
    pub fn new(invoker: Arc<dyn FunctionInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Task for CallFunction {
    fn name(&self) -> &'static str {
        "call-function"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let BackendTarget::Function(name) = ctx.backend().clone() else {
            return Ok(ChainSignal::Continue);
        };

        let event = integration_event(ctx)?;
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                log_backend_call_failed!(function = %name, error = %e, "payload not serializable");
                return Ok(ChainSignal::Done(backend_failure()));
            }
        };

        debug!(function = %name, "invoking function backend");
        ctx.timing.call_started_at = Some(Instant::now());
        let result = self.invoker.invoke(&name, payload).await;
        ctx.timing.call_finished_at = Some(Instant::now());

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                log_backend_call_failed!(function = %name, error = %e, "function invocation failed");
                return Ok(ChainSignal::Done(backend_failure()));
            }
        };
        if let Some(kind) = &result.function_error {
            log_backend_call_failed!(
                function = %name,
                function_error = %kind,
                payload = %String::from_utf8_lossy(&result.payload),
                "function backend error"
            );
            return Ok(ChainSignal::Done(backend_failure()));
        }

        match serde_json::from_slice::<ProxyResponse>(&result.payload) {
            Ok(response) => Ok(ChainSignal::Done(GatewayResponse::from_proxy(response))),
            Err(e) => {
                log_backend_call_failed!(function = %name, error = %e, "function response is not a proxy response");
                Ok(ChainSignal::Done(backend_failure()))
            }
        }
    }
}

/// Sends the integration event to an HTTP backend. The raw response is
/// left for `format-response`.
pub struct CallHttp {
    transport: Arc<dyn HttpTransport>,
    secrets: Arc<dyn SecretStore>,
    dump_mode: DumpMode,
}

impl CallHttp {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretStore>,
        dump_mode: DumpMode,
    ) -> Self {
        Self {
            transport,
            secrets,
            dump_mode,
        }
    }

    async fn client_identity(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<ClientIdentity>, GatewayError> {
        let (Some(key_id), Some(cert_id)) = (
            ctx.stage.client_key_secret.as_deref(),
            ctx.stage.client_certificate_secret.as_deref(),
        ) else {
            return Ok(None);
        };

        let (key, certificate) = futures_util::future::try_join(
            self.secrets.fetch_secret(key_id),
            self.secrets.fetch_secret(cert_id),
        )
        .await
        .map_err(GatewayError::ClientIdentity)?;

        Ok(Some(ClientIdentity {
            certificate_pem: certificate,
            key_pem: key,
        }))
    }
}

#[async_trait]
impl Task for CallHttp {
    fn name(&self) -> &'static str {
        "call-http"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        if !matches!(ctx.backend(), BackendTarget::Http(_)) {
            return Ok(ChainSignal::Continue);
        }
        let url = ctx
            .backend_request()
            .map(|r| r.url.clone())
            .ok_or(GatewayError::MissingBackend)?;
        let event = integration_event(ctx)?;

        let mut headers = Headers::canonical(
            event.headers.as_ref(),
            event.multi_value_headers.as_ref(),
        );
        // the client computes the length of what it actually sends
        headers.remove("content-length");

        let body = event
            .body
            .as_deref()
            .map(|body| decode_body(body, event.is_base64_encoded));
        let identity = self.client_identity(ctx).await?;

        let request = OutboundRequest {
            method: event.http_method.to_uppercase(),
            url,
            headers: headers.to_transport(),
            body,
            identity,
        };
        debug!(
            request = %self.dump_mode.render(&serde_json::json!({
                "method": request.method,
                "url": request.url,
                "headers": headers,
                "body": event.body,
                "backendHttpsClientKeySecret": ctx.stage.client_key_secret,
                "backendHttpsClientCertificateSecret": ctx.stage.client_certificate_secret,
            })),
            "calling backend"
        );

        ctx.timing.call_started_at = Some(Instant::now());
        let outcome = self.transport.send(request).await;
        ctx.timing.call_finished_at = Some(Instant::now());

        let response = outcome.map_err(|e| {
            log_backend_call_failed!(error = %e, "HTTP backend unreachable");
            GatewayError::Transport(e)
        })?;
        debug!(
            status = response.status,
            status_text = %response.status_text,
            headers = %self.dump_mode.render(&serde_json::to_value(&response.headers).unwrap_or_default()),
            "backend responded"
        );
        ctx.backend_response = Some(response);
        Ok(ChainSignal::Continue)
    }
}

/// Turns the raw HTTP response into the final response: textual bodies
/// are decoded, others base64 encoded.
pub struct FormatResponse;

#[async_trait]
impl Task for FormatResponse {
    fn name(&self) -> &'static str {
        "format-response"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        if !matches!(ctx.backend(), BackendTarget::Http(_)) {
            return Ok(ChainSignal::Continue);
        }
        let Some(raw) = ctx.backend_response.as_ref() else {
            warn!("no backend response to format");
            return Ok(ChainSignal::Continue);
        };

        let mut response = GatewayResponse::new(raw.status);
        response.headers = raw.headers.clone();
        if let Some(bytes) = &raw.body {
            let encoded = encode_body(raw.headers.first("content-type"), bytes);
            response.body = Some(encoded.body);
            response.is_base64_encoded = encoded.is_base64_encoded;
        }
        Ok(ChainSignal::Done(response))
    }
}
