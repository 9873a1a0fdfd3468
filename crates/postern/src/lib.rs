//! Postern library.
//!
//! Exposes the gateway pipeline and its building blocks for the binary and
//! for integration tests.

pub mod body;
pub mod cache;
pub mod config;
pub mod context;
pub mod cors;
pub mod error;
pub mod event;
pub mod gateway;
pub mod headers;
pub mod pipeline;
pub mod resolver;
pub mod rewrite;
pub mod runtime;
pub mod server;
pub mod stores;
pub mod tasks;
pub mod transport;
pub mod urls;

pub use config::{GatewayArgs, GatewayConfig};
pub use error::GatewayError;
pub use event::{ProxyEvent, ProxyResponse};
pub use gateway::{Gateway, GatewayBuilder};
