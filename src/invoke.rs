//! Action-invocation capability
//!
//! The composer-produced AST names actions by string; the conductor never
//! knows what an action does, only how to ask the platform to run it and
//! get an `activationId` back. This module defines that capability as a
//! trait so `async`/`parallel`/`map` spawning, and the local CLI driver,
//! can swap backends without touching the interpreter.

use crate::error::ConductorResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Opaque activation id returned by a successful invoke.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActivationId(pub String);

/// `InvokeAction(name, params) -> activationId`.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, name: &str, params: Value) -> ConductorResult<ActivationId>;
}

/// Minimal OpenWhisk-style REST client: `POST {api_host}/api/v1/namespaces/
/// {namespace}/actions/{name}?blocking=false`. The wire format is inferred
/// from the `__OW_*` environment variables and the `openwhisk` config field
/// name this crate already carries.
pub struct HttpInvoker {
    client: reqwest::Client,
    api_host: String,
    namespace: String,
    auth: Option<String>,
    /// Optional debug override parsed from `DEBUG=needle<...>`; when set,
    /// requests go here instead of `api_host`.
    debug_override_host: Option<String>,
}

impl HttpInvoker {
    pub fn new(api_host: String, namespace: String, auth: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_host,
            namespace,
            auth,
            debug_override_host: None,
        }
    }

    pub fn with_debug_override(mut self, host: Option<String>) -> Self {
        self.debug_override_host = host;
        self
    }

    fn base_url(&self) -> &str {
        self.debug_override_host.as_deref().unwrap_or(&self.api_host)
    }
}

#[async_trait]
impl ActionInvoker for HttpInvoker {
    async fn invoke(&self, name: &str, params: Value) -> ConductorResult<ActivationId> {
        let url = format!(
            "{}/api/v1/namespaces/{}/actions/{}?blocking=false",
            self.base_url(),
            self.namespace,
            name
        );
        let mut request = self.client.post(&url).json(&params);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(auth, Option::<&str>::None);
        }
        let response = request.send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        let activation_id = body
            .get("activationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        Ok(ActivationId(activation_id))
    }
}

/// In-memory invoker for tests and the local CLI driver's dry-run mode:
/// records calls and returns stubbed activation ids, optionally running a
/// registered stub so full scenarios can be driven without a real platform.
#[derive(Clone, Default)]
pub struct StubInvoker {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    stubs: Arc<Mutex<HashMap<String, Value>>>,
}

impl StubInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result an action named `name` should "return" when the
    /// test drives its continuation manually.
    pub async fn stub(&self, name: &str, result: Value) {
        self.stubs.lock().await.insert(name.to_string(), result);
    }

    pub async fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().await.clone()
    }

    pub async fn result_for(&self, name: &str) -> Option<Value> {
        self.stubs.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl ActionInvoker for StubInvoker {
    async fn invoke(&self, name: &str, params: Value) -> ConductorResult<ActivationId> {
        self.calls.lock().await.push((name.to_string(), params));
        Ok(ActivationId(format!("stub-{name}-{}", uuid::Uuid::new_v4())))
    }
}
