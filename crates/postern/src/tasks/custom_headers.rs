//! Custom request headers from `HEADER_*` stage variables.
//!
//! Values are literal, `secret:<id>:<key>` (a string field of a JSON
//! secret) or `jsonpath:<expr>` (evaluated against the inbound request).
//! Lookups that fail yield a sentinel value instead of failing the request.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use postern_telemetry::log_header_degraded;
use serde_json::Value;
use serde_json_path::JsonPath;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::headers::Headers;
use crate::pipeline::{ChainSignal, Task};
use crate::stores::SecretStore;

/// Stage variable prefix marking a custom header.
pub const HEADER_PREFIX: &str = "HEADER_";

const SECRET_PREFIX: &str = "secret:";
const JSONPATH_PREFIX: &str = "jsonpath:";

/// Why a header got a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Degraded {
    InvalidSecretSpec,
    UnknownSecretKey,
    InvalidSecretKeyValue,
    InaccessibleSecret,
    InvalidJsonPathSpec,
}

impl Degraded {
    fn sentinel(self) -> &'static str {
        match self {
            Self::InvalidSecretSpec => "invalid_secret_spec",
            Self::UnknownSecretKey => "unknown_secret_key",
            Self::InvalidSecretKeyValue => "invalid_secret_key_value",
            Self::InaccessibleSecret => "inaccessible_secret",
            Self::InvalidJsonPathSpec => "invalid_jsonpath_spec",
        }
    }
}

/// Stage variable suffix to header name: `_` becomes `-`, `__` becomes `_`.
pub fn decode_header_name(raw: &str) -> String {
    raw.split("__")
        .map(|part| part.replace('_', "-"))
        .collect::<Vec<_>>()
        .join("_")
}

pub struct CustomHeaders {
    secrets: Arc<dyn SecretStore>,
}

impl CustomHeaders {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    async fn resolve(&self, spec: &str, event: &Value) -> Result<String, Degraded> {
        if let Some(secret) = spec.strip_prefix(SECRET_PREFIX) {
            self.secret_value(spec, secret).await
        } else if let Some(expr) = spec.strip_prefix(JSONPATH_PREFIX) {
            jsonpath_value(spec, expr, event)
        } else {
            Ok(spec.to_string())
        }
    }

    async fn secret_value(&self, spec: &str, secret: &str) -> Result<String, Degraded> {
        let parts: Vec<&str> = secret.split(':').collect();
        let [id, key] = parts[..] else {
            warn!(spec = %spec, "invalid secret spec");
            return Err(Degraded::InvalidSecretSpec);
        };

        let raw = self.secrets.fetch_secret(id).await.map_err(|e| {
            warn!(secret = %id, error = %e, "secret not accessible");
            Degraded::InaccessibleSecret
        })?;
        let document: Value = serde_json::from_str(&raw).map_err(|e| {
            warn!(secret = %id, error = %e, "secret is not JSON");
            Degraded::InaccessibleSecret
        })?;

        match document.get(key) {
            None => Err(Degraded::UnknownSecretKey),
            Some(Value::Null) => Ok("null".to_string()),
            Some(Value::String(value)) => Ok(value.clone()),
            Some(_) => Err(Degraded::InvalidSecretKeyValue),
        }
    }
}

fn jsonpath_value(spec: &str, expr: &str, event: &Value) -> Result<String, Degraded> {
    let path = JsonPath::parse(expr).map_err(|e| {
        warn!(spec = %spec, error = %e, "invalid jsonpath spec");
        Degraded::InvalidJsonPathSpec
    })?;
    let values: Vec<String> = path
        .query(event)
        .all()
        .into_iter()
        .map(|node| match node {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Ok(values.join(","))
}

#[async_trait]
impl Task for CustomHeaders {
    fn name(&self) -> &'static str {
        "custom-headers"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let candidates: Vec<(String, String)> = ctx
            .event
            .stage_variables
            .iter()
            .flatten()
            .filter_map(|(name, value)| {
                name.strip_prefix(HEADER_PREFIX)
                    .filter(|raw| !raw.is_empty())
                    .map(|raw| (raw.to_string(), value.clone()))
            })
            .collect();
        if candidates.is_empty() {
            return Ok(ChainSignal::Continue);
        }

        let event = serde_json::to_value(&ctx.event).unwrap_or(Value::Null);
        let resolved = join_all(
            candidates
                .iter()
                .map(|(_, spec)| self.resolve(spec, &event)),
        )
        .await;

        let mut headers = Headers::new();
        for ((raw, _), value) in candidates.iter().zip(resolved) {
            let name = decode_header_name(raw);
            let value = match value {
                Ok(value) => value,
                Err(reason) => {
                    log_header_degraded!(header = %name, value = reason.sentinel(), "custom header degraded");
                    reason.sentinel().to_string()
                }
            };
            if value.is_empty() {
                warn!(variable = %format!("{}{}", HEADER_PREFIX, raw), "no value found for custom header");
                continue;
            }
            headers.set(&name, value);
        }

        debug!(count = headers.len(), "custom headers resolved");
        ctx.custom_headers = headers;
        Ok(ChainSignal::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::{context, MemorySecrets};
    use std::sync::atomic::Ordering;

    fn task(secrets: MemorySecrets) -> (CustomHeaders, Arc<MemorySecrets>) {
        let secrets = Arc::new(secrets);
        (CustomHeaders::new(secrets.clone()), secrets)
    }

    #[test]
    fn test_decode_header_name() {
        assert_eq!(decode_header_name("X_Tenant_Id"), "X-Tenant-Id");
        assert_eq!(decode_header_name("x__legacy_id"), "x_legacy-id");
        assert_eq!(decode_header_name("plain"), "plain");
    }

    #[tokio::test]
    async fn test_literal_and_jsonpath_values() {
        let (task, _) = task(MemorySecrets::default());
        let mut ctx = context(&[
            ("HEADER_X_Team", "platform"),
            ("HEADER_X_Api", "jsonpath:$.requestContext.apiId"),
            ("HEADER_X_Params", "jsonpath:$.pathParameters.*"),
            ("HEADER_X_Bad", "jsonpath:$[["),
            ("HEADER_X_Nothing", "jsonpath:$.missing"),
            ("HEADER_", "ignored"),
        ]);
        task.run(&mut ctx).await.unwrap();

        let headers = &ctx.custom_headers;
        assert_eq!(headers.first("x-team"), Some("platform"));
        assert_eq!(headers.first("x-api"), Some("api1"));
        assert_eq!(headers.first("x-params"), Some("42"));
        assert_eq!(headers.first("x-bad"), Some("invalid_jsonpath_spec"));
        assert!(!headers.contains("x-nothing"));
        assert_eq!(headers.len(), 4);
    }

    #[tokio::test]
    async fn test_secret_values_and_sentinels() {
        let (task, secrets) = task(MemorySecrets::with(&[
            (
                "backend/creds",
                r#"{"token":"s3cr3t","empty":null,"port":8443}"#,
            ),
            ("not-json", "plain text"),
        ]));
        let mut ctx = context(&[
            ("HEADER_X_Token", "secret:backend/creds:token"),
            ("HEADER_X_Null", "secret:backend/creds:empty"),
            ("HEADER_X_Port", "secret:backend/creds:port"),
            ("HEADER_X_Unknown", "secret:backend/creds:nope"),
            ("HEADER_X_Spec", "secret:backend/creds"),
            ("HEADER_X_Missing", "secret:absent:token"),
            ("HEADER_X_Garbled", "secret:not-json:token"),
        ]);
        task.run(&mut ctx).await.unwrap();

        let headers = &ctx.custom_headers;
        assert_eq!(headers.first("x-token"), Some("s3cr3t"));
        assert_eq!(headers.first("x-null"), Some("null"));
        assert_eq!(headers.first("x-port"), Some("invalid_secret_key_value"));
        assert_eq!(headers.first("x-unknown"), Some("unknown_secret_key"));
        assert_eq!(headers.first("x-spec"), Some("invalid_secret_spec"));
        assert_eq!(headers.first("x-missing"), Some("inaccessible_secret"));
        assert_eq!(headers.first("x-garbled"), Some("inaccessible_secret"));
        // one fetch per header, no caching
        assert_eq!(secrets.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_no_custom_headers() {
        let (task, _) = task(MemorySecrets::default());
        let mut ctx = context(&[("backendURL", "http://svc")]);
        task.run(&mut ctx).await.unwrap();
        assert!(ctx.custom_headers.is_empty());
    }
}
