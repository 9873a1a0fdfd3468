//! The gateway's tasks and the fixed chains they form.
//!
//! | phase       | tasks                                                          |
//! |-------------|----------------------------------------------------------------|
//! | pre         | static-backend, route-backend, url-info, cors, custom-headers, |
//! |             | prepare-call, integration-event                                |
//! | integration | mock, call-embedded, call-function, call-http, format-response |
//! | post        | response-body, response-headers                                |

mod backend;
mod cors;
mod custom_headers;
mod invoke;
mod mock;
mod prepare;
mod response;

use std::sync::Arc;

pub use backend::{RouteBackend, StaticBackend, UrlInfoTask};
pub use cors::CorsTask;
pub use custom_headers::{decode_header_name, CustomHeaders, HEADER_PREFIX};
pub use invoke::{CallEmbedded, CallFunction, CallHttp, FormatResponse};
pub use mock::MockTask;
pub use prepare::{IntegrationEventTask, PrepareCall};
pub use response::{ResponseBody, ResponseHeaders, BACKEND_OVERHEAD_HEADER, PROXY_OVERHEAD_HEADER};

use crate::config::GatewayConfig;
use crate::cors::CorsEngine;
use crate::pipeline::{Chain, Phase};
use crate::resolver::RouteResolver;
use crate::stores::SecretStore;
use crate::transport::{EmbeddedHandler, FunctionInvoker, HttpTransport};

/// Everything the tasks need from outside the request.
#[derive(Clone)]
pub struct TaskServices {
    pub config: Arc<GatewayConfig>,
    pub resolver: RouteResolver,
    pub cors: CorsEngine,
    pub secrets: Arc<dyn SecretStore>,
    pub http: Arc<dyn HttpTransport>,
    pub functions: Arc<dyn FunctionInvoker>,
    pub embedded: Option<Arc<dyn EmbeddedHandler>>,
}

pub fn pre_integration_chain(services: &TaskServices) -> Chain {
    Chain::new(Phase::PreIntegration)
        .with(StaticBackend)
        .with(RouteBackend::new(services.resolver.clone()))
        .with(UrlInfoTask::new(services.config.default_host.clone()))
        .with(CorsTask::new(services.cors.clone()))
        .with(CustomHeaders::new(Arc::clone(&services.secrets)))
        .with(PrepareCall::new(services.config.rewrite))
        .with(IntegrationEventTask)
}

pub fn integration_chain(services: &TaskServices) -> Chain {
    Chain::new(Phase::Integration)
        .with(MockTask::new(services.config.allow_mocking))
        .with(CallEmbedded::new(services.embedded.clone()))
        .with(CallFunction::new(Arc::clone(&services.functions)))
        .with(CallHttp::new(
            Arc::clone(&services.http),
            Arc::clone(&services.secrets),
            services.config.dump_mode,
        ))
        .with(FormatResponse)
}

pub fn post_integration_chain() -> Chain {
    Chain::new(Phase::PostIntegration)
        .with(ResponseBody)
        .with(ResponseHeaders)
}
