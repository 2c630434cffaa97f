//! Entry/resume dispatch
//!
//! The platform never persists a compiled FSM: every activation — first
//! entry or resumption after a suspend — carries the composition AST
//! alongside the wire input, and this module recompiles it, rebuilds the
//! [`Activation`] from an optional `$composer`, and renders whatever
//! [`StepOutcome`] the interpreter produces back into the JSON shapes the
//! platform expects.

use crate::activation::{Activation, Continuation};
use crate::ast::Node;
use crate::clock::Clock;
use crate::compiler::compile;
use crate::config::EngineConfig;
use crate::error::{ConductorError, ConductorResult};
use crate::interpreter::{self, StepOutcome};
use crate::invoke::ActionInvoker;
use crate::store::Store;
use serde_json::{json, Value};
use tracing::Instrument;

/// Drive one activation of `ast` given the platform's wire `input`
/// (`{...params, $composer?}`), returning the JSON value the platform
/// should see: a continuation, a join marker, or a final result. A
/// `ConductorError` raised while stepping (internal, frame, store, eval,
/// invocation, configuration) never crosses back out as a Rust `Err` —
/// it is normalised to `{"error": "..."}`, same as any other final result.
pub async fn invoke<I, S, C>(
    ast: &Node,
    input: Value,
    invoker: &I,
    store: &S,
    clock: &C,
    config: &EngineConfig,
) -> ConductorResult<Value>
where
    I: ActionInvoker,
    S: Store,
    C: Clock,
{
    let (params, s) = split_composer(input, config);
    let span = tracing::info_span!("conductor_activation", session = %s.session, state = s.state);

    async move {
        let fsm = compile(ast);
        tracing::trace!(states = fsm.len(), "compiled composition");
        let activation = Activation::new(params, s);
        match interpreter::run(&fsm, activation, invoker, store, clock, config).await {
            Ok(outcome) => {
                match &outcome {
                    StepOutcome::Invoke(_) => {
                        tracing::debug!("activation suspended on an action continuation")
                    }
                    StepOutcome::Joined(_) => {
                        tracing::debug!("branch activation terminated, joined the barrier")
                    }
                    StepOutcome::Final(v) if v.get("error").is_some() => {
                        tracing::warn!(error = %v, "activation finished with an error result")
                    }
                    StepOutcome::Final(_) => tracing::debug!("activation reached a final result"),
                }
                serde_json::to_value(&outcome).map_err(ConductorError::from)
            }
            Err(e) => {
                tracing::error!(error = %e, "activation failed, normalising to a final error result");
                Ok(json!({ "error": e.to_string() }))
            }
        }
    }
    .instrument(span)
    .await
}

/// Pull `$composer` out of the wire input, if present, and decode it into a
/// [`Continuation`]; everything else in `input` is `params`. A first-time
/// invocation (no `$composer`) gets a fresh root continuation.
fn split_composer(mut input: Value, config: &EngineConfig) -> (Value, Continuation) {
    let composer_value = match &mut input {
        Value::Object(map) => map.remove("$composer"),
        _ => None,
    };
    match composer_value {
        Some(raw) => match serde_json::from_value::<Continuation>(raw) {
            Ok(mut s) => {
                // A $composer present on the wire means these params just
                // arrived from a completed action call (or the platform
                // itself), and haven't been inspected yet — unless this
                // resumption is a collect re-entry, which inspects as part
                // of a successful collect instead.
                s.resuming = s.collect.is_none();
                (input, s)
            }
            Err(e) => {
                tracing::error!(error = %e, "malformed $composer on resume, starting a fresh root");
                (input, Continuation::root(config.session_id_default.clone()))
            }
        },
        None => (input, Continuation::root(config.session_id_default.clone())),
    }
}
