//! Systems Manager Parameter Store client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::SignedClient;
use crate::{AwsConfig, AwsError};

const GET_PARAMETERS_BY_PATH: &str = "AmazonSSM.GetParametersByPath";

/// A parameter as returned by `GetParametersByPath`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetParametersByPathRequest<'a> {
    path: &'a str,
    recursive: bool,
    with_decryption: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParametersByPathResponse {
    #[serde(default)]
    parameters: Vec<Parameter>,
    next_token: Option<String>,
}

/// Reads parameter trees.
#[derive(Clone)]
pub struct ParameterStoreClient {
    client: SignedClient,
}

impl ParameterStoreClient {
    pub fn new(config: Arc<AwsConfig>) -> Result<Self, AwsError> {
        Ok(Self {
            client: SignedClient::new(config, "ssm")?,
        })
    }

    /// Every parameter below `path`, recursively, following `NextToken`
    /// until the last page. Values are returned without decryption.
    pub async fn get_parameters_by_path(&self, path: &str) -> Result<Vec<Parameter>, AwsError> {
        let mut parameters = Vec::new();
        let mut next_token = None;

        loop {
            let request = GetParametersByPathRequest {
                path,
                recursive: true,
                with_decryption: false,
                next_token: next_token.take(),
            };
            let page: GetParametersByPathResponse = self
                .client
                .json_call(GET_PARAMETERS_BY_PATH, &request)
                .await?;

            parameters.extend(page.parameters);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(
            service = self.client.service(),
            path,
            count = parameters.len(),
            "fetched parameter tree"
        );
        Ok(parameters)
    }
}
