//! AST → FSM compiler
//!
//! One function per combinator, each producing a flat, position-independent
//! state list. Offsets inside a combinator's own
//! output are relative to that combinator's first state; concatenation
//! never needs to rewrite them, which is what lets `compile` be purely
//! recursive and bottom-up.

use crate::ast::Node;
use crate::fsm::{CompiledState, Fsm, StateKind};

/// Compile a composition AST into a flat FSM.
pub fn compile(node: &Node) -> Fsm {
    let mut fsm = compile_node(node);
    if let Some(head) = fsm.first_mut() {
        if head.path.is_none() {
            head.path = node.path().map(str::to_string);
        }
    }
    fsm
}

/// `compile(parent)` with no node.
pub fn compile_empty() -> Fsm {
    vec![CompiledState::new(StateKind::Empty)]
}

fn state(kind: StateKind) -> CompiledState {
    CompiledState::new(kind)
}

fn compile_node(node: &Node) -> Fsm {
    match node {
        Node::Sequence { components, .. } => {
            let mut fsm = vec![state(StateKind::Pass)];
            for c in components {
                fsm.extend(compile_node(c));
            }
            fsm
        }
        Node::Action { name, .. } => {
            let mut s = state(StateKind::Action);
            s.name = Some(name.clone());
            vec![s]
        }
        Node::Function { exec, .. } => {
            let mut s = state(StateKind::Function);
            s.exec = Some(exec.clone());
            vec![s]
        }
        Node::Async { body, .. } => {
            let body_fsm = compile_node(body);
            let mut head = state(StateKind::Async);
            head.ret = Some(body_fsm.len() as i64 + 2);
            let mut fsm = vec![head];
            fsm.extend(body_fsm);
            fsm.push(state(StateKind::Stop));
            fsm.push(state(StateKind::Pass));
            fsm
        }
        Node::Finally { body, finalizer, .. } => {
            let body_fsm = compile_node(body);
            let mut head = state(StateKind::Try);
            head.catch = Some(body_fsm.len() as i64 + 1);
            let mut fsm = vec![head];
            fsm.extend(body_fsm);
            fsm.push(state(StateKind::Exit));
            fsm.extend(compile_node(finalizer));
            fsm
        }
        Node::Let { declarations, body, .. } => {
            let mut head = state(StateKind::Let);
            head.let_decls = Some(Some(declarations.clone()));
            let mut fsm = vec![head];
            fsm.extend(compile_node(body));
            fsm.push(state(StateKind::Exit));
            fsm
        }
        Node::Mask { body, .. } => {
            let mut head = state(StateKind::Let);
            head.let_decls = Some(None);
            let mut fsm = vec![head];
            fsm.extend(compile_node(body));
            fsm.push(state(StateKind::Exit));
            fsm
        }
        Node::Try { body, handler, .. } => {
            let body_fsm = compile_node(body);
            let handler_fsm = compile_node(handler);
            let mut head = state(StateKind::Try);
            head.catch = Some(body_fsm.len() as i64 + 1);
            let mut fsm = vec![head];
            fsm.extend(body_fsm);
            let mut exit = state(StateKind::Exit);
            exit.next = Some(handler_fsm.len() as i64 + 1);
            fsm.push(exit);
            fsm.extend(handler_fsm);
            fsm.push(state(StateKind::Pass));
            fsm
        }
        Node::IfNosave {
            test,
            consequent,
            alternate,
            ..
        } => {
            let test_fsm = compile_node(test);
            let cons_fsm = compile_node(consequent);
            let alt_fsm = compile_node(alternate);
            let mut fsm = vec![state(StateKind::Pass)];
            fsm.extend(test_fsm);
            let mut choice = state(StateKind::Choice);
            choice.then = Some(1);
            choice.else_ = Some(cons_fsm.len() as i64 + 1);
            fsm.push(choice);
            let cons_start = fsm.len();
            fsm.extend(cons_fsm);
            let fsm_len = fsm.len();
            if let Some(last) = fsm.get_mut(fsm_len.saturating_sub(1)) {
                if fsm_len > cons_start {
                    last.next = Some(alt_fsm.len() as i64 + 1);
                }
            }
            fsm.extend(alt_fsm);
            fsm.push(state(StateKind::Pass));
            fsm
        }
        Node::WhileNosave { test, body, .. } => {
            let test_fsm = compile_node(test);
            let body_fsm = compile_node(body);
            let mut fsm = vec![state(StateKind::Pass)];
            fsm.extend(test_fsm);
            let mut choice = state(StateKind::Choice);
            choice.then = Some(1);
            choice.else_ = Some(body_fsm.len() as i64 + 1);
            fsm.push(choice);
            fsm.extend(body_fsm);
            let mut tail = state(StateKind::Pass);
            // Jump back to the test, relative to the tail's own (final) index.
            // `total_len` counts the tail itself: `next = -(len - 2)` where
            // `len` is the whole compiled while-FSM.
            let total_len = fsm.len() as i64 + 1;
            tail.next = Some(-(total_len - 2));
            fsm.push(tail);
            fsm
        }
        Node::DowhileNosave { body, test, .. } => {
            let body_fsm = compile_node(body);
            let test_fsm = compile_node(test);
            let mut fsm = vec![state(StateKind::Pass)];
            fsm.extend(body_fsm);
            fsm.extend(test_fsm);
            let mut choice = state(StateKind::Choice);
            choice.then = Some(-((fsm.len() as i64) - 1));
            choice.else_ = Some(1);
            fsm.push(choice);
            fsm.push(state(StateKind::Pass));
            fsm
        }
        Node::Parallel { components, .. } => {
            let branch_fsms: Vec<Fsm> = components.iter().map(compile_node).collect();
            let mut offsets = Vec::with_capacity(branch_fsms.len());
            let mut cursor = 1i64; // offsets are relative to the `parallel` head
            for b in &branch_fsms {
                offsets.push(cursor);
                cursor += b.len() as i64 + 1; // +1 for the trailing `stop`
            }
            let total_branches_len: i64 = branch_fsms.iter().map(|b| b.len() as i64 + 1).sum();
            let mut head = state(StateKind::Parallel);
            head.ret = Some(total_branches_len);
            head.tasks = Some(offsets);
            let mut fsm = vec![head];
            for b in branch_fsms {
                fsm.extend(b);
                fsm.push(state(StateKind::Stop));
            }
            fsm.push(state(StateKind::Pass));
            fsm
        }
        Node::Map { body, .. } => {
            let body_fsm = compile_node(body);
            let mut head = state(StateKind::Map);
            head.ret = Some(body_fsm.len() as i64 + 2);
            let mut fsm = vec![head];
            fsm.extend(body_fsm);
            fsm.push(state(StateKind::Stop));
            fsm.push(state(StateKind::Pass));
            fsm
        }
        Node::Dynamic { .. } => vec![state(StateKind::Dynamic)],
    }
}
