//! Per-activation runtime state `P` and its serializable continuation `P.s`

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque config for the external key/value store, carried through
/// `$composer.redis` so a branch activation can reach the same barrier
/// store as its parent without re-deriving it from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

/// Present in a branch activation; absent in the root and in non-forked
/// activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinInfo {
    #[serde(rename = "barrierId")]
    pub barrier_id: String,
    pub position: usize,
    pub count: usize,
}

/// `P.s`: the serializable continuation. A plain value-tree so it survives
/// the platform's JSON round-trip intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    pub state: i64,
    #[serde(default)]
    pub stack: Vec<Frame>,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openwhisk: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "join")]
    pub join: Option<JoinInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resuming: bool,
}

impl Continuation {
    /// A fresh root continuation, as built by the entry shim for a
    /// first-time invocation (no `$composer` in the request).
    pub fn root(session: String) -> Self {
        Self {
            state: 0,
            stack: Vec::new(),
            session,
            redis: None,
            openwhisk: None,
            join: None,
            collect: None,
            resuming: false,
        }
    }
}

/// Runtime activation state. Not itself serialized as a unit — `params` and
/// `s` travel separately across the JSON boundary (see `shim.rs`).
#[derive(Debug, Clone)]
pub struct Activation {
    pub params: Value,
    pub s: Continuation,
}

impl Activation {
    pub fn new(params: Value, s: Continuation) -> Self {
        Self { params, s }
    }
}
