//! Lambda invocation client.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::client::SignedClient;
use crate::{AwsConfig, AwsError};

const API_VERSION: &str = "2015-03-31";

/// Result of a synchronous invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub status: u16,
    /// Set when the function itself failed (`X-Amz-Function-Error`).
    pub function_error: Option<String>,
    pub payload: Bytes,
}

/// Invokes functions with the `RequestResponse` invocation type.
#[derive(Clone)]
pub struct LambdaClient {
    client: SignedClient,
}

impl LambdaClient {
    pub fn new(config: Arc<AwsConfig>) -> Result<Self, AwsError> {
        Ok(Self {
            client: SignedClient::new(config, "lambda")?,
        })
    }

    /// Invoke `function` (name, ARN or `name:qualifier`) and wait for its result.
    pub async fn invoke(&self, function: &str, payload: Vec<u8>) -> Result<Invocation, AwsError> {
        let url = self
            .client
            .url(&[API_VERSION, "functions", function, "invocations"])?;

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert(
            "x-amz-invocation-type".to_string(),
            "RequestResponse".to_string(),
        );

        let response = self.client.post(url, headers, payload).await?;
        if !(200..300).contains(&response.status) {
            return Err(self.client.service_error(&response));
        }

        let function_error = response
            .headers
            .get("x-amz-function-error")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Invocation {
            status: response.status,
            function_error,
            payload: response.body,
        })
    }
}
