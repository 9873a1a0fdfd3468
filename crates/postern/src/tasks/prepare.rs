//! Outbound request construction.

use async_trait::async_trait;
use tracing::debug;

use crate::body::decode_body;
use crate::context::{BackendRequest, BackendTarget, RequestContext, FUNCTION_PSEUDO_HOST};
use crate::error::GatewayError;
use crate::event::ProxyEvent;
use crate::headers::{FORWARDED, REQUEST_HOP_BY_HOP};
use crate::pipeline::{ChainSignal, Task};
use crate::rewrite::{rewrite_text, RewriteStrategy};

/// Builds the backend request: URL, filtered and rewritten headers, and the
/// rewritten body.
pub struct PrepareCall {
    rewrite: RewriteStrategy,
}

impl PrepareCall {
    pub fn new(rewrite: RewriteStrategy) -> Self {
        Self { rewrite }
    }
}

#[async_trait]
impl Task for PrepareCall {
    fn name(&self) -> &'static str {
        "prepare-call"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let info = ctx.url_info.as_ref().ok_or(GatewayError::MissingBackend)?;
        let forward = ctx.stage.forward_x_forwarded;

        let mut ignored: Vec<&str> = REQUEST_HOP_BY_HOP.to_vec();
        if !forward {
            ignored.extend_from_slice(FORWARDED);
        }

        // custom headers win; filtering runs after the merge
        let merged = ctx
            .normalized_headers
            .merged(&ctx.custom_headers)
            .omit(&ignored);
        let mut headers = self
            .rewrite
            .rewrite_headers(&merged, &info.api_pattern, &info.backend_url);

        if forward {
            if let Some(host) = ctx.normalized_headers.get("host") {
                headers.insert("x-forwarded-host", host.to_vec());
            }
            headers.set("x-forwarded-prefix-fe", info.frontend_prefix.clone());
            headers.set("x-forwarded-prefix-be", info.backend_prefix.clone());
        }

        let event = &ctx.event;
        let body = match &event.body {
            Some(body) if !event.is_base64_encoded && !ctx.stage.skip_body_rewrite => {
                Some(rewrite_text(body, &info.api_pattern, &info.backend_url))
            }
            other => other.clone(),
        };

        let request = BackendRequest {
            method: ctx.method(),
            url: info.request_url(event.query_string().as_deref()),
            headers,
            body,
            is_base64_encoded: event.is_base64_encoded,
        };
        debug!(method = %request.method, url = %request.url, "backend request prepared");
        ctx.set_backend_request(request)?;
        Ok(ChainSignal::Continue)
    }
}

/// Builds the event handed to function backends and used for the HTTP
/// call.
pub struct IntegrationEventTask;

#[async_trait]
impl Task for IntegrationEventTask {
    fn name(&self) -> &'static str {
        "integration-event"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let request = ctx
            .backend_request()
            .cloned()
            .ok_or(GatewayError::MissingBackend)?;

        let mut headers = request.headers;
        if matches!(ctx.backend(), BackendTarget::Function(_) | BackendTarget::Embedded) {
            headers.set("host", FUNCTION_PSEUDO_HOST);
        }
        if let Some(body) = &request.body {
            let length = decode_body(body, request.is_base64_encoded).len();
            headers.set("content-length", length.to_string());
        }

        let event = ProxyEvent {
            headers: Some(headers.single_valued()),
            multi_value_headers: Some(headers.multi_valued()),
            body: request.body,
            is_base64_encoded: request.is_base64_encoded,
            http_method: request.method,
            ..ctx.event.clone()
        };
        ctx.integration_event = Some(event);
        Ok(ChainSignal::Continue)
    }
}
