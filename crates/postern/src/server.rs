//! Standalone HTTP front end.
//!
//! Adapts plain HTTP/1 requests into inbound events for the gateway and
//! turns response descriptions back into HTTP responses. The API id, stage
//! name and stage variables come from the command line since there is no
//! hosting platform to deliver them.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use postern_telemetry::log_listening;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, warn};
use uuid::Uuid;

use crate::body::{decode_body, encode_body};
use crate::event::{EventContext, ProxyEvent, ProxyResponse};
use crate::gateway::Gateway;
use crate::headers::Headers;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Errors raised while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The stage variables file could not be read.
    #[error("failed to read stage variables from {path}: {source}")]
    StageVariablesRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The stage variables file is not a flat YAML mapping of strings.
    #[error("invalid stage variables in {path}: {source}")]
    StageVariablesParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The listen address could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Per-process request metadata the HTTP front end attaches to every event.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    pub api_id: String,
    pub stage: String,
    pub stage_variables: BTreeMap<String, String>,
}

impl ServeOptions {
    pub fn new(api_id: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            api_id: api_id.into(),
            stage: stage.into(),
            stage_variables: BTreeMap::new(),
        }
    }

    pub fn with_stage_variables(mut self, vars: BTreeMap<String, String>) -> Self {
        self.stage_variables = vars;
        self
    }
}

/// Load stage variables from a YAML mapping.
pub fn load_stage_variables(path: &Path) -> Result<BTreeMap<String, String>, ServerError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ServerError::StageVariablesRead {
        path: display.clone(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ServerError::StageVariablesParse {
        path: display,
        source,
    })
}

/// Build the inbound event for an HTTP request.
///
/// The route template is unknown here, so `resource` is the request path
/// and there are no path parameters. The server answers plain HTTP at the
/// bare request path, so the event carries no stage prefix and
/// `x-forwarded-proto` defaults to `http`.
pub fn build_event(parts: &Parts, body: &[u8], options: &ServeOptions) -> ProxyEvent {
    let mut headers = Headers::new();
    for (name, value) in &parts.headers {
        headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    if !headers.contains(FORWARDED_PROTO) {
        headers.set(FORWARDED_PROTO, "http");
    }

    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(raw) = parts.uri.query() {
        for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
            query.entry(name.into_owned()).or_default().push(value.into_owned());
        }
    }
    let single_query: BTreeMap<String, String> = query
        .iter()
        .filter_map(|(name, values)| values.last().map(|v| (name.clone(), v.clone())))
        .collect();

    let (body, is_base64_encoded) = if body.is_empty() {
        (None, false)
    } else {
        let encoded = encode_body(headers.first("content-type"), body);
        (Some(encoded.body), encoded.is_base64_encoded)
    };

    let path = parts.uri.path().to_string();
    ProxyEvent {
        resource: path.clone(),
        http_method: parts.method.as_str().to_string(),
        headers: Some(headers.single_valued()),
        multi_value_headers: Some(headers.multi_valued()),
        query_string_parameters: (!single_query.is_empty()).then_some(single_query),
        multi_value_query_string_parameters: (!query.is_empty()).then_some(query),
        path_parameters: None,
        stage_variables: (!options.stage_variables.is_empty())
            .then(|| options.stage_variables.clone()),
        request_context: EventContext {
            api_id: options.api_id.clone(),
            stage: options.stage.clone(),
            resource_path: path.clone(),
            path: path.clone(),
            request_id: Some(Uuid::new_v4().to_string()),
            ..EventContext::default()
        },
        path,
        body,
        is_base64_encoded,
    }
}

/// Turn a response description into an HTTP response.
pub fn into_http(response: ProxyResponse) -> Response<Full<Bytes>> {
    let headers = Headers::canonical(
        response.headers.as_ref(),
        response.multi_value_headers.as_ref(),
    );
    let body = response
        .body
        .as_deref()
        .map(|body| decode_body(body, response.is_base64_encoded))
        .unwrap_or_default();

    let status = StatusCode::from_u16(response.status_code).unwrap_or_else(|_| {
        warn!(status = response.status_code, "invalid status code from gateway");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    let mut builder = Response::builder().status(status);
    for (name, values) in headers.iter() {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    match builder.body(Full::new(Bytes::from(body))) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "response headers not representable");
            plain_response(StatusCode::BAD_GATEWAY, "invalid response headers")
        }
    }
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Handle an incoming HTTP request.
async fn handle_request(
    gateway: Arc<Gateway>,
    options: Arc<ServeOptions>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return Ok(plain_response(
                StatusCode::BAD_REQUEST,
                "failed to read request body",
            ));
        }
    };

    let event = build_event(&parts, &body, &options);
    Ok(into_http(gateway.handle(event).await))
}

/// Bind `addr` and accept connections until the process stops.
pub async fn serve(
    gateway: Arc<Gateway>,
    options: ServeOptions,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve_listener(gateway, options, listener).await;
    Ok(())
}

/// Accept connections on an already bound listener. Never returns.
pub async fn serve_listener(gateway: Arc<Gateway>, options: ServeOptions, listener: TcpListener) {
    match listener.local_addr() {
        Ok(addr) => {
            log_listening!(address = %addr, api_id = %options.api_id, stage = %options.stage, "listening")
        }
        Err(e) => warn!(error = %e, "listener address unknown"),
    }

    let options = Arc::new(options);
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };

        let gateway = Arc::clone(&gateway);
        let options = Arc::clone(&options);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                handle_request(Arc::clone(&gateway), Arc::clone(&options), req)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "connection error");
            }
        });
    }
}
