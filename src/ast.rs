//! Composition AST types
//!
//! The composer that produces these ASTs is out of scope for this crate;
//! it emits them as opaque JSON, and the conductor only needs to
//! deserialize and compile them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user function body, evaluated by [`crate::eval`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExec {
    /// Source code for the embedded evaluator
    pub code: String,
}

/// One node of a composition AST.
///
/// Tagged on `type` to match the wire format produced by the composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Run `components` one after another, threading `params` through
    Sequence {
        components: Vec<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Invoke a named external action
    Action {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Evaluate a user function body in-process
    Function {
        exec: FunctionExec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Fork `body` into an independent activation; parent does not wait
    Async {
        body: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Run `body`; always run `finalizer` afterwards, success or error
    Finally {
        body: Box<Node>,
        finalizer: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Push a lexical binding frame around `body`
    Let {
        declarations: Map<String, Value>,
        body: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Hide the innermost enclosing `let` frame from `body`'s lexical view
    Mask {
        body: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Run `body`; on error, run `handler` with the error as `params`
    Try {
        body: Box<Node>,
        handler: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Evaluate `test`, then `consequent` or `alternate`
    #[serde(rename = "if_nosave")]
    IfNosave {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Evaluate `test`; while truthy, run `body` and re-test
    #[serde(rename = "while_nosave")]
    WhileNosave {
        test: Box<Node>,
        body: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Run `body`; evaluate `test`; repeat while truthy
    #[serde(rename = "dowhile_nosave")]
    DowhileNosave {
        body: Box<Node>,
        test: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Fork `components` into independent activations, join on all results
    Parallel {
        components: Vec<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Fork `body` once per element of `params.value`, join preserving order
    Map {
        body: Box<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Invoke whatever action `params` names at runtime
    Dynamic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl Node {
    /// AST path stamped on this node, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Node::Sequence { path, .. }
            | Node::Action { path, .. }
            | Node::Function { path, .. }
            | Node::Async { path, .. }
            | Node::Finally { path, .. }
            | Node::Let { path, .. }
            | Node::Mask { path, .. }
            | Node::Try { path, .. }
            | Node::IfNosave { path, .. }
            | Node::WhileNosave { path, .. }
            | Node::DowhileNosave { path, .. }
            | Node::Parallel { path, .. }
            | Node::Map { path, .. }
            | Node::Dynamic { path } => path.as_deref(),
        }
    }
}
