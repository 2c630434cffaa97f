//! The compiled, flat FSM state list
//!
//! States are position-independent: every jump field
//! (`next`, `then`, `else`, `catch`, `return`, `tasks`) is a relative offset
//! from the compiled sub-range's own head, until the top-level `Fsm` is
//! assembled, at which point the compiler has already flattened everything
//! into one absolute index space.

use crate::ast::FunctionExec;
use serde::{Deserialize, Serialize};

/// Discriminant for a compiled state's behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Pass,
    Action,
    Function,
    Async,
    Stop,
    Empty,
    Choice,
    Try,
    Let,
    Exit,
    Parallel,
    Map,
    Dynamic,
}

/// One compiled FSM state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledState {
    /// AST path of the enclosing node, for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(rename = "type")]
    pub kind: StateKind,
    /// Relative jump, defaults to `+1` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<i64>,
    /// Action name (`action` states)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function body (`function` states)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<FunctionExec>,
    /// Truthy branch offset (`choice` states)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<i64>,
    /// Falsy branch offset (`choice` states)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "else")]
    pub else_: Option<i64>,
    /// Handler offset (`try` states)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<i64>,
    /// Resume offset past a forked body (`async`/`parallel`/`map` states)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "return")]
    pub ret: Option<i64>,
    /// Declarations, or explicit mask (`let` states)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "let")]
    pub let_decls: Option<Option<serde_json::Map<String, serde_json::Value>>>,
    /// Branch entry offsets relative to this state (`parallel` states)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<i64>>,
    /// AST path stamped on a combinator's head state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl CompiledState {
    pub fn new(kind: StateKind) -> Self {
        Self {
            parent: None,
            kind,
            next: None,
            name: None,
            exec: None,
            then: None,
            else_: None,
            catch: None,
            ret: None,
            let_decls: None,
            tasks: None,
            path: None,
        }
    }

    /// `node.next || 1`
    pub fn advance(&self) -> i64 {
        self.next.unwrap_or(1)
    }
}

/// A flat, compiled, position-independent list of states.
pub type Fsm = Vec<CompiledState>;

/// `true` when `state` is outside `[0, fsm.len())`, i.e. terminal.
pub fn is_terminal(state: i64, len: usize) -> bool {
    state < 0 || state as usize >= len
}
