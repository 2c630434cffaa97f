//! Conductor configuration, resolved from the process environment
//!
//! The `__OW_*` family (the only genuinely structured group) goes through
//! `envy`, the handful of loosely-related overrides are read directly.

use crate::error::{ConductorError, ConductorResult};
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_HEARTBEAT_ACTION: &str = "conductor/heartbeat";
const DEFAULT_BARRIER_TTL_SECONDS: i64 = 60 * 60 * 24;

/// The `__OW_*` group, decoded by `envy` with its `__OW_` prefix stripped.
#[derive(Debug, Default, Deserialize)]
struct OwEnv {
    action_name: Option<String>,
    activation_id: Option<String>,
    deadline: Option<i64>,
}

/// Raw overrides not part of the `__OW_*` family, keyed by variable name.
#[derive(Debug, Default)]
struct Overrides {
    debug: Option<String>,
    heartbeat_action: Option<String>,
    redis_uri: Option<String>,
    redis_ca: Option<String>,
    barrier_ttl_seconds: Option<i64>,
}

impl Overrides {
    fn from_map(env: &HashMap<String, String>) -> Self {
        Self {
            debug: env.get("DEBUG").cloned(),
            heartbeat_action: env.get("CONDUCTOR_HEARTBEAT_ACTION").cloned(),
            redis_uri: env.get("CONDUCTOR_REDIS_URI").cloned(),
            redis_ca: env.get("CONDUCTOR_REDIS_CA").cloned(),
            barrier_ttl_seconds: env
                .get("CONDUCTOR_BARRIER_TTL_SECONDS")
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Typed, validated conductor configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The conductor's own action name, used for self-invocation. `None`
    /// when the process has no `__OW_ACTION_NAME` (e.g. the local CLI
    /// driver); attempting `async`/`parallel`/`map` without it is a
    /// configuration error raised at the point of use.
    pub action_name: Option<String>,
    pub session_id_default: String,
    pub deadline_ms: Option<i64>,
    pub debug_needle: Option<Value>,
    pub heartbeat_action: String,
    pub redis_uri: Option<String>,
    pub redis_ca_base64: Option<String>,
    pub barrier_ttl_seconds: i64,
}

impl EngineConfig {
    /// Resolve configuration from the current process environment.
    pub fn from_env() -> ConductorResult<Self> {
        let ow: OwEnv = envy::prefixed("__OW_").from_env().unwrap_or_default();
        let env_map: HashMap<String, String> = std::env::vars().collect();
        Self::build(ow, Overrides::from_map(&env_map))
    }

    fn build(ow: OwEnv, overrides: Overrides) -> ConductorResult<Self> {
        let debug_needle = match overrides.debug {
            Some(debug) => Some(parse_debug_needle(&debug)?),
            None => None,
        };
        if let Some(ca) = &overrides.redis_ca {
            validate_redis_ca_base64(ca)?;
        }
        Ok(Self {
            action_name: ow.action_name,
            session_id_default: ow.activation_id.unwrap_or_default(),
            deadline_ms: ow.deadline,
            debug_needle,
            heartbeat_action: overrides
                .heartbeat_action
                .unwrap_or_else(|| DEFAULT_HEARTBEAT_ACTION.to_string()),
            redis_uri: overrides.redis_uri,
            redis_ca_base64: overrides.redis_ca,
            barrier_ttl_seconds: overrides.barrier_ttl_seconds.unwrap_or(DEFAULT_BARRIER_TTL_SECONDS),
        })
    }

    /// The action name to self-invoke with, or a configuration error.
    pub fn require_action_name(&self) -> ConductorResult<&str> {
        self.action_name
            .as_deref()
            .ok_or_else(|| ConductorError::Config("__OW_ACTION_NAME is not set".to_string()))
    }
}

/// `CONDUCTOR_REDIS_CA` is carried as base64 on the wire; checked eagerly
/// here so a misconfigured deployment fails at startup rather than on the
/// first `RedisStore::connect`.
fn validate_redis_ca_base64(ca: &str) -> ConductorResult<()> {
    base64::engine::general_purpose::STANDARD
        .decode(ca)
        .map(|_| ())
        .map_err(|e| ConductorError::Config(format!("CONDUCTOR_REDIS_CA is not valid base64: {e}")))
}

/// Extract and parse the JSON payload of a `DEBUG=...needle<{...}>...`
/// environment variable.
fn parse_debug_needle(debug: &str) -> ConductorResult<Value> {
    let start = debug
        .find("needle<")
        .map(|i| i + "needle<".len())
        .ok_or_else(|| ConductorError::Config("DEBUG has no needle<...> payload".to_string()))?;
    let end = debug[start..]
        .rfind('>')
        .map(|i| start + i)
        .ok_or_else(|| ConductorError::Config("DEBUG needle<...> is unterminated".to_string()))?;
    serde_json::from_str(&debug[start..end])
        .map_err(|e| ConductorError::Config(format!("DEBUG needle<...> is not valid JSON: {e}")))
}
