//! Cross-origin enforcement and direct preflight answers.

use async_trait::async_trait;
use postern_telemetry::log_cors_origin_rejected;

use crate::context::{CorsOutcome, RequestContext};
use crate::cors::{CorsDecision, CorsEngine};
use crate::error::GatewayError;
use crate::event::GatewayResponse;
use crate::pipeline::{ChainSignal, Task};

/// Applies the cross-origin policy; answers preflights when configured to.
pub struct CorsTask {
    engine: CorsEngine,
}

impl CorsTask {
    pub fn new(engine: CorsEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Task for CorsTask {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        match self.engine.evaluate(&ctx.event, &ctx.normalized_headers)? {
            CorsDecision::NotApplied => {
                ctx.cors = CorsOutcome::NotApplied;
                Ok(ChainSignal::Continue)
            }
            CorsDecision::Rejected { origin, allowed } => {
                let api_url = ctx.url_info.as_ref().map(|info| info.api_url.as_str());
                log_cors_origin_rejected!(
                    origin = %origin,
                    allowed = %allowed,
                    api_url = ?api_url,
                    "origin not allowed"
                );
                ctx.cors = CorsOutcome::Rejected;
                Ok(ChainSignal::Continue)
            }
            CorsDecision::Allowed {
                headers,
                answer_preflight,
            } => {
                ctx.additional_response_headers = ctx.additional_response_headers.merged(&headers);
                ctx.cors = CorsOutcome::Allowed;
                if answer_preflight {
                    return Ok(ChainSignal::Done(GatewayResponse::new(204).with_body("")));
                }
                Ok(ChainSignal::Continue)
            }
        }
    }
}
