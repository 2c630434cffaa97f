//! End-to-end composition scenarios, driven directly through
//! `interpreter::run` (bypassing the entry/resume shim's `$composer`
//! serialization round-trip, which `shim.rs`'s own tests already cover).

use conductor::{
    compile, Clock, Continuation, EngineConfig, FixedClock, FunctionExec, InMemoryStore, Node,
    StepOutcome, StubInvoker,
};
use serde_json::{json, Value};

fn action(name: &str) -> Node {
    Node::Action {
        name: name.to_string(),
        path: None,
    }
}

fn function(code: &str) -> Node {
    Node::Function {
        exec: FunctionExec {
            code: code.to_string(),
        },
        path: None,
    }
}

fn cfg() -> EngineConfig {
    EngineConfig {
        action_name: Some("conductor/run".to_string()),
        session_id_default: "root-session".to_string(),
        deadline_ms: None,
        debug_needle: None,
        heartbeat_action: "conductor/heartbeat".to_string(),
        redis_uri: None,
        redis_ca_base64: None,
        barrier_ttl_seconds: 86_400,
    }
}

/// A 1 second deadline slack keeps `collect`'s first timeout short instead
/// of falling back to the 55s default, for the fork/map scenarios below.
fn cfg_with_short_deadline() -> EngineConfig {
    EngineConfig {
        deadline_ms: Some(1_000),
        ..cfg()
    }
}

fn root(params: Value) -> conductor::Activation {
    conductor::Activation::new(params, Continuation::root("s1".to_string()))
}

/// Extracts `$composer` from an `action` continuation and marks it as a
/// resumption, the way the entry shim's `split_composer` would.
fn resume_from(invoke: &conductor::InvokeContinuation, params: Value) -> conductor::Activation {
    let mut s = invoke.state.composer.clone();
    s.resuming = s.collect.is_none();
    conductor::Activation::new(params, s)
}

fn as_invoke(outcome: StepOutcome) -> conductor::InvokeContinuation {
    match outcome {
        StepOutcome::Invoke(inv) => inv,
        other => panic!("expected an invoke continuation, got {other:?}"),
    }
}

fn as_final(outcome: StepOutcome) -> Value {
    match outcome {
        StepOutcome::Final(v) => v,
        other => panic!("expected a final result, got {other:?}"),
    }
}

/// Scenario 1: sequence(action("A"), action("B")) suspends twice, resuming
/// each action's result as `params` for the next, reaching a final result
/// shaped from `B`'s own return.
#[tokio::test]
async fn sequence_of_actions_runs_in_order() {
    let ast = Node::Sequence {
        components: vec![action("A"), action("B")],
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg();

    let outcome = conductor::interpreter::run(&fsm, root(json!({"x": 1})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let first = as_invoke(outcome);
    assert_eq!(first.action, "A");
    assert_eq!(first.params, json!({"x": 1}));

    let outcome = conductor::interpreter::run(
        &fsm,
        resume_from(&first, json!({"x": 2})),
        &invoker,
        &store,
        &clock,
        &config,
    )
    .await
    .unwrap();
    let second = as_invoke(outcome);
    assert_eq!(second.action, "B");
    assert_eq!(second.params, json!({"x": 2}));

    let outcome = conductor::interpreter::run(
        &fsm,
        resume_from(&second, json!({"x": 3})),
        &invoker,
        &store,
        &clock,
        &config,
    )
    .await
    .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"x": 3}}));
}

/// Scenario 2: if_nosave branches on the test's `value`, skipping the
/// alternate once the consequent has run.
#[tokio::test]
async fn if_else_picks_the_matching_branch() {
    let ast = Node::IfNosave {
        test: Box::new(function("#{value: params.x > 0}")),
        consequent: Box::new(function("#{branch: \"yes\"}")),
        alternate: Box::new(function("#{branch: \"no\"}")),
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg();

    let positive = conductor::interpreter::run(&fsm, root(json!({"x": 5})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    assert_eq!(as_final(positive), json!({"params": {"branch": "yes"}}));

    let negative = conductor::interpreter::run(&fsm, root(json!({"x": -1})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    assert_eq!(as_final(negative), json!({"params": {"branch": "no"}}));
}

/// Scenario 3: try(action("F"), action("H")) dispatches to `H` with the
/// error when `F` fails, and skips `H` entirely when `F` succeeds.
#[tokio::test]
async fn try_dispatches_to_handler_on_error_and_skips_it_on_success() {
    let ast = Node::Try {
        body: Box::new(action("F")),
        handler: Box::new(action("H")),
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg();

    // Error path.
    let outcome = conductor::interpreter::run(&fsm, root(json!({})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let f_call = as_invoke(outcome);
    assert_eq!(f_call.action, "F");

    let outcome = conductor::interpreter::run(
        &fsm,
        resume_from(&f_call, json!({"error": "e"})),
        &invoker,
        &store,
        &clock,
        &config,
    )
    .await
    .unwrap();
    let h_call = as_invoke(outcome);
    assert_eq!(h_call.action, "H");
    assert_eq!(h_call.params, json!({"error": "e"}));

    let outcome = conductor::interpreter::run(
        &fsm,
        resume_from(&h_call, json!({"handled": true})),
        &invoker,
        &store,
        &clock,
        &config,
    )
    .await
    .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"handled": true}}));

    // Success path: the handler never runs.
    let outcome = conductor::interpreter::run(&fsm, root(json!({})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let f_call = as_invoke(outcome);
    let outcome = conductor::interpreter::run(
        &fsm,
        resume_from(&f_call, json!({"ok": true})),
        &invoker,
        &store,
        &clock,
        &config,
    )
    .await
    .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"ok": true}}));
}

/// Scenario 4: let({x:1}, sequence(function("x=x+1"), function("x"))) reads
/// back the mutated binding; the trailing bare number is wrapped like any
/// other inspected scalar before it's reported.
#[tokio::test]
async fn let_scope_mutation_is_visible_to_a_later_read() {
    let mut decls = serde_json::Map::new();
    decls.insert("x".to_string(), json!(1));
    let ast = Node::Let {
        declarations: decls,
        body: Box::new(Node::Sequence {
            components: vec![function("x = x + 1;"), function("x")],
            path: None,
        }),
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg();

    let outcome = conductor::interpreter::run(&fsm, root(json!({})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"value": 2}}));
}

/// Scenario 6: map(action("Inc")) over `[1,2,3]` forks one branch per item
/// and reassembles the results in the original order regardless of the
/// order the branches actually finish in.
#[tokio::test]
async fn map_over_array_preserves_order() {
    let ast = Node::Map {
        body: Box::new(function("params.value + 1")),
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg_with_short_deadline();

    let outcome = conductor::interpreter::run(
        &fsm,
        root(json!({"value": [1, 2, 3]})),
        &invoker,
        &store,
        &clock,
        &config,
    )
    .await
    .unwrap();
    // No branch has completed yet: the first collect attempt times out and
    // the parent suspends on a heartbeat continuation.
    let heartbeat = as_invoke(outcome);
    assert_eq!(heartbeat.action, "conductor/heartbeat");

    let calls = invoker.calls().await;
    assert_eq!(calls.len(), 3);

    // Drive the three branches to completion, out of dispatch order.
    for (_, params) in calls.iter().rev() {
        let mut branch_params = params.clone();
        let composer = branch_params.as_object_mut().unwrap().remove("$composer").unwrap();
        let continuation: Continuation = serde_json::from_value(composer).unwrap();
        let branch = conductor::Activation::new(branch_params, continuation);
        let outcome = conductor::interpreter::run(&fsm, branch, &invoker, &store, &clock, &config)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Joined(_)));
    }

    let resumed = resume_from(&heartbeat, heartbeat.params.clone());
    let outcome = conductor::interpreter::run(&fsm, resumed, &invoker, &store, &clock, &config)
        .await
        .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"value": [2, 3, 4]}}));
}

/// Scenario 5: parallel(action("A"), action("B")) joins both branches back
/// in task order rather than completion order.
#[tokio::test]
async fn parallel_joins_branches_in_task_order() {
    let ast = Node::Parallel {
        components: vec![function("1"), function("2")],
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg_with_short_deadline();

    let outcome = conductor::interpreter::run(&fsm, root(json!({})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let heartbeat = as_invoke(outcome);

    let calls = invoker.calls().await;
    assert_eq!(calls.len(), 2);
    for (_, params) in calls.iter().rev() {
        let mut branch_params = params.clone();
        let composer = branch_params.as_object_mut().unwrap().remove("$composer").unwrap();
        let continuation: Continuation = serde_json::from_value(composer).unwrap();
        let branch = conductor::Activation::new(branch_params, continuation);
        conductor::interpreter::run(&fsm, branch, &invoker, &store, &clock, &config)
            .await
            .unwrap();
    }

    let resumed = resume_from(&heartbeat, heartbeat.params.clone());
    let outcome = conductor::interpreter::run(&fsm, resumed, &invoker, &store, &clock, &config)
        .await
        .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"value": [1, 2]}}));
}

/// Scenario 7: async(action("Bg")) spawns a sibling activation and carries
/// on immediately with the spawned activation id, without suspending.
#[tokio::test]
async fn async_spawns_without_suspending_the_parent() {
    let ast = Node::Async {
        body: Box::new(action("Bg")),
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg();

    let outcome = conductor::interpreter::run(&fsm, root(json!({"x": 1})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let result = as_final(outcome);
    let params = result.get("params").unwrap();
    assert_eq!(params.get("method").and_then(Value::as_str), Some("async"));
    assert_eq!(params.get("sessionId").and_then(Value::as_str), Some("s1"));
    assert!(params.get("activationId").is_some());

    let calls = invoker.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "conductor/run");
}

/// Scenario 8: a parent that outlives its deadline before any branch
/// completes suspends on a heartbeat continuation carrying `collect`; a
/// second heartbeat before any branch finishes re-enters the same barrier
/// rather than allocating a new one, and once both branches finish, the
/// next re-entry collects exactly once and reaches the final result.
#[tokio::test]
async fn collect_timeout_resumes_idempotently_without_double_collecting() {
    let ast = Node::Map {
        body: Box::new(function("params.value + 1")),
        path: None,
    };
    let fsm = compile(&ast);
    let invoker = StubInvoker::new();
    let store = InMemoryStore::new();
    let clock = FixedClock(0);
    let config = cfg_with_short_deadline();

    let outcome = conductor::interpreter::run(&fsm, root(json!({"value": [1, 2]})), &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let first_heartbeat = as_invoke(outcome);
    assert_eq!(first_heartbeat.action, "conductor/heartbeat");
    let barrier_id = first_heartbeat.state.composer.collect.clone().expect("collect must be set");

    // Re-enter before either branch has finished: still nothing to collect,
    // so it times out again onto the same barrier instead of forking again.
    let resumed = resume_from(&first_heartbeat, first_heartbeat.params.clone());
    let outcome = conductor::interpreter::run(&fsm, resumed, &invoker, &store, &clock, &config)
        .await
        .unwrap();
    let second_heartbeat = as_invoke(outcome);
    assert_eq!(
        second_heartbeat.state.composer.collect.as_deref(),
        Some(barrier_id.as_str())
    );
    assert_eq!(invoker.calls().await.len(), 2, "no branch should be spawned twice");

    // Now finish both branches.
    let calls = invoker.calls().await;
    for (_, params) in calls.iter().rev() {
        let mut branch_params = params.clone();
        let composer = branch_params.as_object_mut().unwrap().remove("$composer").unwrap();
        let continuation: Continuation = serde_json::from_value(composer).unwrap();
        let branch = conductor::Activation::new(branch_params, continuation);
        let outcome = conductor::interpreter::run(&fsm, branch, &invoker, &store, &clock, &config)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Joined(_)));
    }

    // The third re-entry finally collects and completes; a fourth re-entry
    // against the same (already-collected) barrier would see an empty store
    // and time out again rather than silently duplicating the result, so
    // this resumption must be the one that reaches `Final`.
    let resumed = resume_from(&second_heartbeat, second_heartbeat.params.clone());
    let outcome = conductor::interpreter::run(&fsm, resumed, &invoker, &store, &clock, &config)
        .await
        .unwrap();
    assert_eq!(as_final(outcome), json!({"params": {"value": [2, 3]}}));
}

/// `SystemClock` advances with real time; exercised here only to confirm
/// the trait object boundary compiles and returns a sane value, since the
/// other scenarios all use `FixedClock` for determinism.
#[test]
fn system_clock_reports_a_positive_timestamp() {
    let clock = conductor::SystemClock;
    assert!(clock.now_ms() > 0);
}
