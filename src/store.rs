//! External key/value store capability
//!
//! The fork/join barrier (`crate::barrier`) needs exactly a handful of
//! primitives: a length-returning push, a conditional
//! (push-only-if-key-exists) push, a blocking timed right-pop, an atomic
//! rename, a range read, delete, and per-key expiration. This module
//! defines that surface as a trait so the interpreter never depends on a
//! concrete backend, plus two implementations: `RedisStore` for production
//! and `InMemoryStore` for tests.

use crate::error::{ConductorError, ConductorResult};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// The external key/value store capability the barrier is built on.
#[async_trait]
pub trait Store: Send + Sync {
    /// `LPUSH key value` — unconditional push, returns list length after push.
    async fn lpush(&self, key: &str, value: &str) -> ConductorResult<i64>;

    /// `LPUSHX key value` — push only if `key` already exists, returns the
    /// list length after push, or `0` if `key` does not exist.
    async fn lpushx(&self, key: &str, value: &str) -> ConductorResult<i64>;

    /// `BRPOP key timeout` — blocking right-pop with a timeout in seconds;
    /// `Ok(None)` on timeout.
    async fn brpop(&self, key: &str, timeout_secs: u64) -> ConductorResult<Option<String>>;

    /// `RENAME src dst` — atomic; the last successful `lpushx` is the one
    /// that observes this is now safe to do (see `barrier.rs`).
    async fn rename(&self, src: &str, dst: &str) -> ConductorResult<()>;

    /// `LRANGE key start stop`
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> ConductorResult<Vec<String>>;

    /// `DEL key [key ...]`
    async fn del(&self, keys: &[&str]) -> ConductorResult<()>;

    /// `EXPIRE key seconds`
    async fn expire(&self, key: &str, seconds: i64) -> ConductorResult<()>;
}

/// Redis-backed store, built from a connection URI (and optional
/// base64-encoded TLS CA, per `$composer.redis.ca`).
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(uri: &str) -> ConductorResult<Self> {
        let client = redis::Client::open(uri)
            .map_err(|e| ConductorError::Store(format!("invalid redis uri: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn lpush(&self, key: &str, value: &str) -> ConductorResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.lpush(key, value).await?)
    }

    async fn lpushx(&self, key: &str, value: &str) -> ConductorResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.lpush_exists(key, value).await?)
    }

    async fn brpop(&self, key: &str, timeout_secs: u64) -> ConductorResult<Option<String>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn.brpop(key, timeout_secs as f64).await?;
        Ok(result.map(|(_, value)| value))
    }

    async fn rename(&self, src: &str, dst: &str) -> ConductorResult<()> {
        let mut conn = self.conn.clone();
        conn.rename::<_, _, ()>(src, dst).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> ConductorResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn del(&self, keys: &[&str]) -> ConductorResult<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<&str> = keys.to_vec();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: i64) -> ConductorResult<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, seconds).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemState {
    lists: HashMap<String, VecDeque<String>>,
}

/// In-memory store used by the test suite so barrier/interpreter tests
/// never depend on a live Redis instance. Implements the same primitives
/// with the same push-only-if-exists and rename-is-atomic semantics.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn lpush(&self, key: &str, value: &str) -> ConductorResult<i64> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len() as i64)
    }

    async fn lpushx(&self, key: &str, value: &str) -> ConductorResult<i64> {
        let mut state = self.state.lock().await;
        match state.lists.get_mut(key) {
            Some(list) => {
                list.push_front(value.to_string());
                Ok(list.len() as i64)
            }
            None => Ok(0),
        }
    }

    async fn brpop(&self, key: &str, timeout_secs: u64) -> ConductorResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs.max(1));
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(list) = state.lists.get_mut(key) {
                    if let Some(v) = list.pop_back() {
                        return Ok(Some(v));
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn rename(&self, src: &str, dst: &str) -> ConductorResult<()> {
        let mut state = self.state.lock().await;
        let list = state
            .lists
            .remove(src)
            .ok_or_else(|| ConductorError::Store(format!("no such key: {src}")))?;
        state.lists.insert(dst.to_string(), list);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> ConductorResult<Vec<String>> {
        let state = self.state.lock().await;
        let list = match state.lists.get(key) {
            Some(l) => l,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as i64;
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len.max(1) - 1).max(0)
            }
        };
        if len == 0 {
            return Ok(Vec::new());
        }
        let (s, e) = (norm(start), norm(stop));
        if s > e {
            return Ok(Vec::new());
        }
        Ok(list.iter().skip(s as usize).take((e - s + 1) as usize).cloned().collect())
    }

    async fn del(&self, keys: &[&str]) -> ConductorResult<()> {
        let mut state = self.state.lock().await;
        for k in keys {
            state.lists.remove(*k);
        }
        Ok(())
    }

    async fn expire(&self, _key: &str, _seconds: i64) -> ConductorResult<()> {
        // No TTL semantics in-memory; barrier keys are cleaned up explicitly
        // by `del` on every completion path the tests exercise.
        Ok(())
    }
}
