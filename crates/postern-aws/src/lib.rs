//! Minimal AWS clients used by the Postern gateway.
//!
//! Every call is a SigV4-signed request issued with `reqwest`:
//! - [`ParameterStoreClient`]: recursive, paginated `GetParametersByPath`
//! - [`SecretsManagerClient`]: `GetSecretValue`
//! - [`LambdaClient`]: synchronous `Invoke`
//!
//! The endpoint can be overridden (see [`AwsConfig::with_endpoint`]) so the
//! clients can be pointed at a local emulator or a mock server.

mod client;
pub mod credentials;
pub mod error;
pub mod lambda;
pub mod secrets;
pub mod sigv4;
pub mod ssm;

pub use client::AwsConfig;
pub use credentials::Credentials;
pub use error::AwsError;
pub use lambda::{Invocation, LambdaClient};
pub use secrets::SecretsManagerClient;
pub use ssm::ParameterStoreClient;
