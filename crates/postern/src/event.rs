//! Inbound request and outbound response descriptions.
//!
//! These follow the API Gateway proxy integration shapes, which is what the
//! hosting entry points deliver and what function backends receive and
//! return.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::headers::Headers;

/// An inbound request as delivered by the entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub multi_value_headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub multi_value_query_string_parameters: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub path_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub stage_variables: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub request_context: EventContext,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// The `requestContext` block. Fields the gateway does not read are kept
/// in `extra` so they reach function backends untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default)]
    pub api_id: String,
    #[serde(default)]
    pub stage: String,
    /// Route template, e.g. `/orders/{id}`.
    #[serde(default)]
    pub resource_path: String,
    /// Raw request path including the stage prefix.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProxyEvent {
    /// Stage variable lookup.
    pub fn stage_variable(&self, name: &str) -> Option<&str> {
        self.stage_variables
            .as_ref()
            .and_then(|vars| vars.get(name))
            .map(String::as_str)
    }

    /// Form-encoded query string, preferring the multi-valued parameters.
    pub fn query_string(&self) -> Option<String> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        if let Some(multi) = self
            .multi_value_query_string_parameters
            .as_ref()
            .filter(|m| !m.is_empty())
        {
            for (name, values) in multi {
                for value in values {
                    serializer.append_pair(name, value);
                    any = true;
                }
            }
        } else if let Some(single) = &self.query_string_parameters {
            for (name, value) in single {
                serializer.append_pair(name, value);
                any = true;
            }
        }
        any.then(|| serializer.finish())
    }
}

/// A response description handed back to the entry point, or returned by
/// a function backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_value_headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_base64_encoded: bool,
}

impl ProxyResponse {
    /// Answer used when the pipeline produced nothing.
    pub fn no_content() -> Self {
        Self {
            status_code: 204,
            ..Self::default()
        }
    }
}

/// The gateway's own response representation, with canonical headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl GatewayResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Normalize a response in either header convention.
    pub fn from_proxy(response: ProxyResponse) -> Self {
        Self {
            status: response.status_code,
            headers: Headers::canonical(
                response.headers.as_ref(),
                response.multi_value_headers.as_ref(),
            ),
            body: response.body,
            is_base64_encoded: response.is_base64_encoded,
        }
    }

    /// Multi-value form for the entry point.
    pub fn into_proxy(self) -> ProxyResponse {
        ProxyResponse {
            status_code: self.status,
            headers: None,
            multi_value_headers: Some(self.headers.multi_valued()),
            body: self.body,
            is_base64_encoded: self.is_base64_encoded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_deserializes_api_gateway_shape() {
        let event: ProxyEvent = serde_json::from_value(json!({
            "resource": "/docs/{id}",
            "path": "/docs/42",
            "httpMethod": "GET",
            "headers": {"Host": "api.example.com"},
            "multiValueHeaders": null,
            "queryStringParameters": null,
            "pathParameters": {"id": "42"},
            "stageVariables": {"backendURL": "http://svc.internal"},
            "requestContext": {
                "apiId": "abc123",
                "stage": "prod",
                "resourcePath": "/docs/{id}",
                "path": "/prod/docs/42",
                "identity": {"sourceIp": "10.0.0.1"}
            },
            "body": null,
            "isBase64Encoded": false
        }))
        .unwrap();

        assert_eq!(event.http_method, "GET");
        assert_eq!(event.stage_variable("backendURL"), Some("http://svc.internal"));
        assert_eq!(event.request_context.api_id, "abc123");
        assert_eq!(
            event.request_context.extra["identity"]["sourceIp"],
            "10.0.0.1"
        );

        // unknown requestContext fields survive a round trip
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["requestContext"]["identity"]["sourceIp"], "10.0.0.1");
    }

    #[test]
    fn test_query_string_prefers_multi_value() {
        let event = ProxyEvent {
            query_string_parameters: Some(BTreeMap::from([("tag".into(), "b".into())])),
            multi_value_query_string_parameters: Some(BTreeMap::from([(
                "tag".into(),
                vec!["a".into(), "b c".into()],
            )])),
            ..ProxyEvent::default()
        };
        assert_eq!(event.query_string().as_deref(), Some("tag=a&tag=b+c"));
    }

    #[test]
    fn test_query_string_absent() {
        assert_eq!(ProxyEvent::default().query_string(), None);
    }

    #[test]
    fn test_function_response_normalized() {
        let response: ProxyResponse = serde_json::from_value(json!({
            "statusCode": 201,
            "headers": {"Content-Type": "application/json"},
            "multiValueHeaders": {"Set-Cookie": ["a=1", "b=2"]},
            "body": "{}"
        }))
        .unwrap();

        let normalized = GatewayResponse::from_proxy(response);
        assert_eq!(normalized.status, 201);
        assert_eq!(normalized.headers.first("content-type"), Some("application/json"));
        assert_eq!(normalized.headers.get("set-cookie").map(<[String]>::len), Some(2));
        assert!(!normalized.is_base64_encoded);
    }

    #[test]
    fn test_no_content_serializes_minimal() {
        let value = serde_json::to_value(ProxyResponse::no_content()).unwrap();
        assert_eq!(value, json!({"statusCode": 204, "body": null}));
    }
}
