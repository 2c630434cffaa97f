//! Fork/join over the external store
//!
//! `parallel`/`map` both reduce to the same shape: a
//! set of sibling branch activations sharing one barrier id, each pushing
//! its result into a list guarded by a sentinel so the last writer (and
//! only the last writer) can observe the barrier is complete and hand it
//! off to whoever is collecting.

use crate::activation::{Activation, Continuation, JoinInfo};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::ConductorResult;
use crate::frame::Frame;
use crate::interpreter::{self, attach_composer, inspect, StepOutcome};
use crate::invoke::ActionInvoker;
use crate::store::Store;
use serde_json::{json, Value};
use uuid::Uuid;

/// Heartbeat actions re-enter `conductor/heartbeat` rather than the session
/// deadline itself; leave a minute of slack even when no `__OW_DEADLINE` is
/// available (the local CLI driver, most tests).
const DEFAULT_COLLECT_TIMEOUT_SECONDS: u64 = 55;

/// What a fork/collect step hands back to the caller in `interpreter::run`.
pub enum BarrierEffect {
    /// The branches were dispatched (or the barrier was already complete)
    /// and stepping should continue from the updated `Activation`.
    Continue,
    /// Nothing is ready yet; the caller must suspend with this outcome.
    Suspend(StepOutcome),
}

fn live_key(barrier_id: &str) -> String {
    format!("live/{barrier_id}")
}

fn done_key(barrier_id: &str) -> String {
    format!("done/{barrier_id}")
}

/// Allocate a barrier, spawn one activation per branch with a `join`
/// continuation, then fall into `collect`.
pub async fn fork<I, S, C>(
    p: &mut Activation,
    resume_state: i64,
    branch_entries: Vec<i64>,
    branch_params: Vec<Value>,
    invoker: &I,
    store: &S,
    config: &EngineConfig,
    clock: &C,
) -> ConductorResult<BarrierEffect>
where
    I: ActionInvoker,
    S: Store,
    C: Clock,
{
    p.s.state = resume_state;
    p.params = json!({ "value": Vec::<Value>::new() });
    let n = branch_entries.len();

    if n == 0 {
        return Ok(BarrierEffect::Continue);
    }

    let action_name = match config.require_action_name() {
        Ok(name) => name.to_string(),
        Err(e) => {
            p.params = json!({ "error": e.to_string() });
            inspect(p);
            return Ok(BarrierEffect::Continue);
        }
    };

    let barrier_id = Uuid::new_v4().to_string();
    let live = live_key(&barrier_id);

    if let Err(e) = store.lpush(&live, "42").await {
        p.params = json!({ "error": format!("fork failed to allocate barrier: {e}") });
        inspect(p);
        return Ok(BarrierEffect::Continue);
    }
    store.expire(&live, config.barrier_ttl_seconds).await.ok();

    let mut child_stack = vec![Frame::marker()];
    child_stack.extend(p.s.stack.clone());

    for (position, (entry, branch_param)) in branch_entries.into_iter().zip(branch_params).enumerate() {
        let join = JoinInfo {
            barrier_id: barrier_id.clone(),
            position,
            count: n,
        };
        let child_composer = Continuation {
            state: entry,
            stack: child_stack.clone(),
            session: p.s.session.clone(),
            redis: p.s.redis.clone(),
            openwhisk: p.s.openwhisk.clone(),
            join: Some(join),
            collect: None,
            resuming: false,
        };
        let mut spawn_params = branch_param;
        attach_composer(&mut spawn_params, &child_composer)?;
        if let Err(e) = invoker.invoke(&action_name, spawn_params).await {
            store.del(&[&live, &done_key(&barrier_id)]).await.ok();
            p.params = json!({ "error": format!("fork failed to spawn branch {position}: {e}") });
            inspect(p);
            return Ok(BarrierEffect::Continue);
        }
    }

    let timeout = compute_timeout(config, clock);
    collect_inner(p, &barrier_id, store, config, timeout).await
}

/// Block on the barrier's completion list, computing a timeout from the
/// activation's deadline, or re-suspend with a
/// heartbeat continuation that carries `collect` so the next activation
/// re-enters here directly.
pub async fn collect<S, C>(
    p: &mut Activation,
    barrier_id: &str,
    store: &S,
    config: &EngineConfig,
    clock: &C,
) -> ConductorResult<BarrierEffect>
where
    S: Store,
    C: Clock,
{
    let timeout = compute_timeout(config, clock);
    collect_inner(p, barrier_id, store, config, timeout).await
}

async fn collect_inner<S: Store>(
    p: &mut Activation,
    barrier_id: &str,
    store: &S,
    config: &EngineConfig,
    timeout: u64,
) -> ConductorResult<BarrierEffect> {
    let live = live_key(barrier_id);
    let done = done_key(barrier_id);

    match store.brpop(&done, timeout).await? {
        Some(_) => {
            let raw = store.lrange(&done, 0, -1).await?;
            let mut slots: Vec<(usize, Value)> = Vec::new();
            let mut max_position = 0usize;
            for entry in &raw {
                if entry == "42" {
                    continue;
                }
                let record: Value = serde_json::from_str(entry)?;
                let position = record.get("position").and_then(Value::as_u64).unwrap_or(0) as usize;
                let params = record.get("params").cloned().unwrap_or(Value::Null);
                max_position = max_position.max(position);
                slots.push((position, params));
            }
            let mut values = vec![Value::Null; max_position + 1];
            for (position, params) in slots {
                if position < values.len() {
                    values[position] = params;
                }
            }
            store.del(&[&live, &done]).await?;
            p.params = json!({ "value": values });
            inspect(p);
            Ok(BarrierEffect::Continue)
        }
        None => {
            p.s.collect = Some(barrier_id.to_string());
            let heartbeat = interpreter::invoke_continuation(config.heartbeat_action.clone(), p.params.clone(), &p.s);
            Ok(BarrierEffect::Suspend(StepOutcome::Invoke(heartbeat)))
        }
    }
}

/// `floor((deadline - now) / 1000) - 5`, never less than 1 second, so the
/// blocking pop always returns before the platform kills the activation.
fn compute_timeout<C: Clock>(config: &EngineConfig, clock: &C) -> u64 {
    match config.deadline_ms {
        Some(deadline) => {
            let remaining_secs = (deadline - clock.now_ms()) / 1000 - 5;
            remaining_secs.max(1) as u64
        }
        None => DEFAULT_COLLECT_TIMEOUT_SECONDS,
    }
}

/// A branch activation that reaches a terminal
/// state pushes its result (push-only-if-live) and, if it observes the
/// barrier is now full, renames `live` to `done` so the waiting `collect`
/// wakes up. Exactly one branch ever wins that race.
pub async fn branch_terminal<S: Store>(
    p: &Activation,
    join: &JoinInfo,
    store: &S,
) -> ConductorResult<StepOutcome> {
    let live = live_key(&join.barrier_id);
    let done = done_key(&join.barrier_id);
    let record = json!({ "position": join.position, "params": p.params }).to_string();

    let count = store.lpushx(&live, &record).await?;
    if count as usize > join.count {
        store.rename(&live, &done).await.ok();
    }

    Ok(StepOutcome::Joined(interpreter::join_result(
        p.s.session.clone(),
        join.barrier_id.clone(),
        join.position,
    )))
}
