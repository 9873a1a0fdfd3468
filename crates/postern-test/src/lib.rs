//! Test harnesses for the Postern gateway.
//!
//! Provides in-memory collaborators and `TestGateway` for end-to-end tests
//! that run the full task pipeline in process.

pub mod fakes;
pub mod gateway;

pub use fakes::{EchoHandler, MemoryParameters, MemorySecrets, ScriptedFunctions};
pub use gateway::{TestError, TestGateway, TestRequest, TestResponse, API_ID, STAGE};
