//! The step loop: advances an activation across an FSM until it suspends
//! or terminates.

use crate::activation::{Activation, Continuation};
use crate::barrier::{self, BarrierEffect};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{ConductorError, ConductorResult};
use crate::eval;
use crate::frame::{collapse_env, write_back_env, Frame};
use crate::fsm::{is_terminal, CompiledState, Fsm, StateKind};
use crate::invoke::ActionInvoker;
use crate::store::Store;
use serde::Serialize;
use serde_json::{json, Value};

/// `{"$composer": <continuation>}`, the shape merged into outgoing params.
#[derive(Debug, Clone, Serialize)]
pub struct ComposerWrapper {
    #[serde(rename = "$composer")]
    pub composer: Continuation,
}

/// `{method:'action', action, params, state:{$composer}}`
#[derive(Debug, Clone, Serialize)]
pub struct InvokeContinuation {
    pub method: String,
    pub action: String,
    pub params: Value,
    pub state: ComposerWrapper,
}

/// `{method:'join', sessionId, barrierId, position}`
#[derive(Debug, Clone, Serialize)]
pub struct JoinResult {
    pub method: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "barrierId")]
    pub barrier_id: String,
    pub position: usize,
}

/// What a fully-stepped activation hands back to the entry/resume shim.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StepOutcome {
    Invoke(InvokeContinuation),
    Joined(JoinResult),
    Final(Value),
}

fn build_invoke(action: String, params: Value, s: &Continuation) -> InvokeContinuation {
    InvokeContinuation {
        method: "action".to_string(),
        action,
        params,
        state: ComposerWrapper { composer: s.clone() },
    }
}

/// Merge `$composer` into an object-shaped `params`; every place this is
/// called, `params` is the branch/async spawn payload, which this crate
/// always constructs as an object.
pub fn attach_composer(params: &mut Value, composer: &Continuation) -> ConductorResult<()> {
    let composer_value = serde_json::to_value(composer)?;
    match params {
        Value::Object(map) => {
            map.insert("$composer".to_string(), composer_value);
            Ok(())
        }
        ref other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), (**other).clone());
            map.insert("$composer".to_string(), composer_value);
            *params = Value::Object(map);
            Ok(())
        }
    }
}

/// JS-style truthiness of `params.value`, used by `choice`.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Wrap non-plain-object `params`, then unwind to the
/// nearest `catch` above the nearest `marker` if `params.error` is set.
pub fn inspect(p: &mut Activation) {
    if !p.params.is_object() {
        p.params = json!({ "value": p.params });
    }
    if let Some(err) = p.params.get("error").cloned() {
        p.params = json!({ "error": err });
        p.s.state = -1;
        unwind_to_catch(p);
    }
}

/// Discards non-catching frames above the nearest `catch` (or `marker`),
/// then jumps to the target `exit` state. The catch frame itself is left in
/// place: `exit` performs the one official pop, on both the success and the
/// error path, so `try`/`exit` always pop exactly one frame (P3) instead of
/// unwind consuming it and `exit` double-popping.
fn unwind_to_catch(p: &mut Activation) {
    while let Some(top) = p.s.stack.first() {
        if top.is_marker() {
            return;
        }
        if let Some(catch_state) = top.as_catch() {
            p.s.state = catch_state;
            return;
        }
        p.s.stack.remove(0);
    }
}

fn finalize_params(params: &Value) -> Value {
    if params.get("error").is_some() {
        params.clone()
    } else {
        json!({ "params": params })
    }
}

fn map_item_params(item: &Value) -> Value {
    match item {
        Value::Object(_) => item.clone(),
        other => json!({ "value": other }),
    }
}

/// Drive `p` through `fsm` until it suspends (needs a platform invocation,
/// times out waiting on a barrier) or terminates.
pub async fn run<I, S, C>(
    fsm: &Fsm,
    mut p: Activation,
    invoker: &I,
    store: &S,
    clock: &C,
    config: &EngineConfig,
) -> ConductorResult<StepOutcome>
where
    I: ActionInvoker,
    S: Store,
    C: Clock,
{
    // A resumed activation whose parent is waiting on a barrier re-enters
    // collect directly rather than stepping from `fsm[state]`.
    if let Some(barrier_id) = p.s.collect.take() {
        match barrier::collect(&mut p, &barrier_id, store, config, clock).await? {
            BarrierEffect::Continue => {}
            BarrierEffect::Suspend(outcome) => return Ok(outcome),
        }
    } else if p.s.resuming {
        inspect(&mut p);
    }

    loop {
        if is_terminal(p.s.state, fsm.len()) {
            return terminal(&mut p, store).await;
        }

        let idx = p.s.state;
        let node: &CompiledState = &fsm[idx as usize];
        p.s.state = idx + node.advance();

        match node.kind {
            StateKind::Pass => {}
            StateKind::Empty => inspect(&mut p),
            StateKind::Choice => {
                let v = truthy(p.params.get("value").unwrap_or(&Value::Null));
                let offset = if v {
                    node.then.unwrap_or(0)
                } else {
                    node.else_.unwrap_or(0)
                };
                p.s.state = idx + offset;
            }
            StateKind::Try => {
                let target = idx
                    + node
                        .catch
                        .ok_or_else(|| ConductorError::Internal("try state has no catch offset".into()))?;
                p.s.stack.insert(0, Frame::catch(target));
            }
            StateKind::Let => match &node.let_decls {
                Some(Some(decls)) => p.s.stack.insert(0, Frame::let_frame(decls.clone())),
                Some(None) => p.s.stack.insert(0, Frame::mask()),
                None => {
                    return Err(ConductorError::Internal("let state has no declarations".into()))
                }
            },
            StateKind::Exit => {
                if p.s.stack.is_empty() {
                    return Err(ConductorError::Internal(
                        "exit on an empty stack".to_string(),
                    ));
                }
                p.s.stack.remove(0);
                // A `try` exit's `next` skips past the handler on success. An
                // error reaches this same state via the catch jump; falling
                // through to idx+1 instead lands on the handler rather than
                // skipping it.
                if p.params.get("error").is_some() {
                    p.s.state = idx + 1;
                }
            }
            StateKind::Action => {
                let name = node
                    .name
                    .clone()
                    .ok_or_else(|| ConductorError::Internal("action state has no name".into()))?;
                return Ok(StepOutcome::Invoke(build_invoke(name, p.params.clone(), &p.s)));
            }
            StateKind::Dynamic => match parse_dynamic(&p.params) {
                Some((name, inner_params)) => {
                    return Ok(StepOutcome::Invoke(build_invoke(name, inner_params, &p.s)));
                }
                None => {
                    p.params = json!({ "error": "dynamic: params must be {type:'action', name, params}" });
                    inspect(&mut p);
                }
            },
            StateKind::Function => {
                let exec = node
                    .exec
                    .as_ref()
                    .ok_or_else(|| ConductorError::Internal("function state has no body".into()))?;
                let env = collapse_env(&p.s.stack);
                let outcome = eval::eval(exec, &env, &p.params)?;
                p.params = outcome.params;
                write_back_env(&mut p.s.stack, &outcome.env);
            }
            StateKind::Stop => {
                p.s.state = -1;
            }
            StateKind::Async => {
                let resume_state = idx
                    + node
                        .ret
                        .ok_or_else(|| ConductorError::Internal("async state has no return offset".into()))?;
                let body_entry = idx + 1;
                let action_name = config.require_action_name()?.to_string();

                let mut child_stack = vec![Frame::marker()];
                child_stack.extend(p.s.stack.clone());
                let child_composer = Continuation {
                    state: body_entry,
                    stack: child_stack,
                    session: p.s.session.clone(),
                    redis: p.s.redis.clone(),
                    openwhisk: p.s.openwhisk.clone(),
                    join: None,
                    collect: None,
                    resuming: false,
                };
                let mut spawn_params = p.params.clone();
                attach_composer(&mut spawn_params, &child_composer)?;
                let activation_id = invoker.invoke(&action_name, spawn_params).await?;

                p.params = json!({
                    "method": "async",
                    "activationId": activation_id.0,
                    "sessionId": p.s.session,
                });
                p.s.state = resume_state;
            }
            StateKind::Parallel => {
                let resume_state = idx
                    + node
                        .ret
                        .ok_or_else(|| ConductorError::Internal("parallel state has no return offset".into()))?;
                let tasks = node
                    .tasks
                    .as_ref()
                    .ok_or_else(|| ConductorError::Internal("parallel state has no tasks".into()))?;
                let branch_entries: Vec<i64> = tasks.iter().map(|t| idx + t).collect();
                let n = branch_entries.len();
                let branch_params = vec![p.params.clone(); n];
                match barrier::fork(
                    &mut p,
                    resume_state,
                    branch_entries,
                    branch_params,
                    invoker,
                    store,
                    config,
                    clock,
                )
                .await?
                {
                    BarrierEffect::Continue => {}
                    BarrierEffect::Suspend(outcome) => return Ok(outcome),
                }
            }
            StateKind::Map => {
                let resume_state = idx
                    + node
                        .ret
                        .ok_or_else(|| ConductorError::Internal("map state has no return offset".into()))?;
                let items = p
                    .params
                    .get("value")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let branch_entries: Vec<i64> = vec![idx + 1; items.len()];
                let branch_params: Vec<Value> = items.iter().map(map_item_params).collect();
                match barrier::fork(
                    &mut p,
                    resume_state,
                    branch_entries,
                    branch_params,
                    invoker,
                    store,
                    config,
                    clock,
                )
                .await?
                {
                    BarrierEffect::Continue => {}
                    BarrierEffect::Suspend(outcome) => return Ok(outcome),
                }
            }
        }
    }
}

fn parse_dynamic(params: &Value) -> Option<(String, Value)> {
    let obj = params.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some("action") {
        return None;
    }
    let name = obj.get("name")?.as_str()?.to_string();
    let inner = obj.get("params")?.clone();
    if !inner.is_object() {
        return None;
    }
    Some((name, inner))
}

async fn terminal<S: Store>(p: &mut Activation, store: &S) -> ConductorResult<StepOutcome> {
    match p.s.join.clone() {
        Some(join) => barrier::branch_terminal(p, &join, store).await,
        None => {
            // A bare scalar result (e.g. a trailing `function` whose
            // expression evaluated to a number) gets the same {value: ...}
            // wrapping as any other inspected params before it's reported.
            inspect(p);
            Ok(StepOutcome::Final(finalize_params(&p.params)))
        }
    }
}

/// Exposed for `barrier.rs`, which needs to build the same shape when a
/// collect timeout re-invokes the heartbeat action.
pub(crate) fn invoke_continuation(action: String, params: Value, s: &Continuation) -> InvokeContinuation {
    build_invoke(action, params, s)
}

/// Exposed for `barrier.rs`, which constructs its own `JoinResult` on
/// branch termination.
pub(crate) fn join_result(session_id: String, barrier_id: String, position: usize) -> JoinResult {
    JoinResult {
        method: "join".to_string(),
        session_id,
        barrier_id,
        position,
    }
}
