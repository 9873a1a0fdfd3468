//! In-memory collaborators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use postern_lib::event::{ProxyEvent, ProxyResponse};
use postern_lib::stores::{ParameterStore, SecretStore, StoreError};
use postern_lib::transport::{EmbeddedHandler, FunctionInvoker, FunctionResult, TransportError};

/// A flat parameter tree. Counts fetches and can be switched to failing.
#[derive(Default)]
pub struct MemoryParameters {
    tree: RwLock<BTreeMap<String, String>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.tree.write().insert(key.into(), value.into());
    }

    pub fn clear(&self) {
        self.tree.write().clear();
    }

    /// Make every following fetch fail.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParameterStore for MemoryParameters {
    async fn fetch_tree(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("parameter store offline".into()));
        }
        Ok(self
            .tree
            .read()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Secrets by id. Counts fetches.
#[derive(Default)]
pub struct MemorySecrets {
    secrets: RwLock<BTreeMap<String, String>>,
    calls: AtomicUsize,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: impl Into<String>, secret: impl Into<String>) {
        self.secrets.write().insert(id.into(), secret.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecrets {
    async fn fetch_secret(&self, id: &str) -> Result<String, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Function backends answering from a script, recording every payload.
#[derive(Default)]
pub struct ScriptedFunctions {
    scripts: RwLock<BTreeMap<String, FunctionResult>>,
    invocations: Mutex<Vec<(String, Value)>>,
}

impl ScriptedFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer invocations of `name` with `response`.
    pub fn respond(&self, name: impl Into<String>, response: &ProxyResponse) {
        let payload = serde_json::to_vec(response).unwrap_or_default();
        self.scripts.write().insert(
            name.into(),
            FunctionResult {
                payload: Bytes::from(payload),
                function_error: None,
            },
        );
    }

    /// Make `name` fail the way an unhandled exception does.
    pub fn fail(&self, name: impl Into<String>, message: &str) {
        let payload = serde_json::json!({ "errorMessage": message, "errorType": "Error" });
        self.scripts.write().insert(
            name.into(),
            FunctionResult {
                payload: Bytes::from(payload.to_string()),
                function_error: Some("Unhandled".into()),
            },
        );
    }

    /// Payloads received so far, by function name.
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl FunctionInvoker for ScriptedFunctions {
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<FunctionResult, TransportError> {
        let event = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        self.invocations.lock().push((name.to_string(), event));
        self.scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::Invocation(format!("function {} not found", name)))
    }
}

/// Embedded handler that answers with the event it received as JSON.
pub struct EchoHandler;

#[async_trait]
impl EmbeddedHandler for EchoHandler {
    async fn handle(&self, event: ProxyEvent) -> ProxyResponse {
        ProxyResponse {
            status_code: 200,
            headers: Some(BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )])),
            body: serde_json::to_string(&event).ok(),
            ..ProxyResponse::default()
        }
    }
}
