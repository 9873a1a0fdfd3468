use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::event::GatewayResponse;
use crate::pipeline::{ChainSignal, Task};

/// Answers requests whose stage sets `mock` to `"true"`.
///
/// The mock echoes what the gateway would have sent, which can include
/// credentials, so it only works when mocking is allowed for the process.
pub struct MockTask {
    allowed: bool,
}

impl MockTask {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl Task for MockTask {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        if !ctx.stage.mock {
            return Ok(ChainSignal::Continue);
        }
        if !self.allowed {
            warn!("blocking mocking attempt");
            return Ok(ChainSignal::Done(
                GatewayResponse::new(400)
                    .with_header("content-type", "text/plain")
                    .with_body("Mocking has been disabled"),
            ));
        }

        ctx.timing.call_started_at = Some(Instant::now());
        let event = ctx.integration_event.as_ref().unwrap_or(&ctx.event);
        let summary = json!({
            "method": event.http_method,
            "path": event.path,
            "resource": event.resource,
            "headers": event.multi_value_headers,
            "query": event.multi_value_query_string_parameters,
            "backend": ctx.backend().to_string(),
            "requestUrl": ctx.backend_request().map(|r| r.url.as_str()),
        });
        ctx.timing.call_finished_at = Some(Instant::now());

        info!("creating mock response");
        Ok(ChainSignal::Done(
            GatewayResponse::new(200)
                .with_header("content-type", "application/json")
                .with_body(summary.to_string()),
        ))
    }
}
