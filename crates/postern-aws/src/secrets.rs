//! Secrets Manager client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::SignedClient;
use crate::{AwsConfig, AwsError};

const GET_SECRET_VALUE: &str = "secretsmanager.GetSecretValue";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueRequest<'a> {
    secret_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueResponse {
    secret_string: Option<String>,
}

/// Reads secret strings. Nothing is cached.
#[derive(Clone)]
pub struct SecretsManagerClient {
    client: SignedClient,
}

impl SecretsManagerClient {
    pub fn new(config: Arc<AwsConfig>) -> Result<Self, AwsError> {
        Ok(Self {
            client: SignedClient::new(config, "secretsmanager")?,
        })
    }

    /// The `SecretString` of the current version of `secret_id`.
    pub async fn get_secret_value(&self, secret_id: &str) -> Result<String, AwsError> {
        let response: GetSecretValueResponse = self
            .client
            .json_call(GET_SECRET_VALUE, &GetSecretValueRequest { secret_id })
            .await?;

        response.secret_string.ok_or_else(|| AwsError::Decode {
            service: self.client.service(),
            message: format!("secret {} has no string value", secret_id),
        })
    }
}
