//! Parameter and secret stores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use postern_aws::{AwsError, ParameterStoreClient, SecretsManagerClient};
use thiserror::Error;

/// Errors raised by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key or secret does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The store could not be queried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The AWS call failed.
    #[error(transparent)]
    Aws(#[from] AwsError),
}

/// Source of flattened configuration trees.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Every key below `prefix` (recursively), mapped to its string value.
    /// Keys are returned in full, prefix included.
    async fn fetch_tree(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError>;
}

/// Source of secret strings. Implementations must not cache.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch_secret(&self, id: &str) -> Result<String, StoreError>;
}

/// Stand-in used when no AWS configuration is available. Every lookup
/// fails as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

#[async_trait]
impl ParameterStore for Unconfigured {
    async fn fetch_tree(&self, _prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Err(StoreError::Unavailable("no AWS configuration".into()))
    }
}

#[async_trait]
impl SecretStore for Unconfigured {
    async fn fetch_secret(&self, _id: &str) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("no AWS configuration".into()))
    }
}

#[async_trait]
impl ParameterStore for ParameterStoreClient {
    async fn fetch_tree(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let parameters = self.get_parameters_by_path(prefix).await?;
        Ok(parameters.into_iter().map(|p| (p.name, p.value)).collect())
    }
}

#[async_trait]
impl SecretStore for SecretsManagerClient {
    async fn fetch_secret(&self, id: &str) -> Result<String, StoreError> {
        match self.get_secret_value(id).await {
            Ok(secret) => Ok(secret),
            Err(AwsError::Service { code, .. }) if code == "ResourceNotFoundException" => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_stores_fail() {
        let err = Unconfigured.fetch_tree("/apis").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(Unconfigured.fetch_secret("tls-key").await.is_err());
    }
}
