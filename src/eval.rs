//! User function body evaluator
//!
//! A user function body is a nullary call against a collapsed lexical
//! environment, receiving `params` as its sole argument, with post-call
//! write-back of any environment mutations. This module implements that
//! contract on top of an embedded scripting engine (`rhai`) instead of a
//! JS-compatible evaluator.

use crate::ast::FunctionExec;
use crate::error::{ConductorError, ConductorResult};
use serde_json::{Map, Value};

/// Outcome of evaluating a function body.
pub struct EvalOutcome {
    /// New `params`, or the prior value unchanged when the script evaluates
    /// to unit (`()`), matching "a function whose body returns `undefined`
    /// leaves `params` unchanged".
    pub params: Value,
    /// Final state of every environment key, for write-back via
    /// [`crate::frame::write_back_env`].
    pub env: Map<String, Value>,
}

/// Evaluate `exec.code` with `env` as free variables and `params` bound as
/// the script's `params` global.
pub fn eval(exec: &FunctionExec, env: &Map<String, Value>, params: &Value) -> ConductorResult<EvalOutcome> {
    let engine = rhai::Engine::new();
    let mut scope = rhai::Scope::new();

    for (k, v) in env {
        let dynamic = rhai::serde::to_dynamic(v)
            .map_err(|e| ConductorError::Eval(format!("binding `{k}`: {e}")))?;
        scope.push_dynamic(k.clone(), dynamic);
    }
    let params_dynamic = rhai::serde::to_dynamic(params)
        .map_err(|e| ConductorError::Eval(format!("binding `params`: {e}")))?;
    scope.push_dynamic("params", params_dynamic);

    let result: rhai::Dynamic = engine
        .eval_with_scope(&mut scope, &exec.code)
        .map_err(|e| ConductorError::Eval(e.to_string()))?;

    if result.is::<rhai::FnPtr>() {
        return Err(ConductorError::Eval(
            "function body returned a function value".to_string(),
        ));
    }

    let new_params = if result.is_unit() {
        params.clone()
    } else {
        rhai::serde::from_dynamic(&result)
            .map_err(|e| ConductorError::Eval(format!("return value: {e}")))?
    };

    let mut new_env = Map::new();
    for k in env.keys() {
        if let Some(v) = scope.get_value::<rhai::Dynamic>(k) {
            let json = rhai::serde::from_dynamic(&v)
                .map_err(|e| ConductorError::Eval(format!("binding `{k}`: {e}")))?;
            new_env.insert(k.clone(), json);
        }
    }

    Ok(EvalOutcome {
        params: new_params,
        env: new_env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn returns_new_params_from_expression() {
        let exec = FunctionExec {
            code: "params.x + 1".to_string(),
        };
        let out = eval(&exec, &Map::new(), &json!({"x": 1})).unwrap();
        assert_eq!(out.params, json!(2));
    }

    #[test]
    fn unit_result_preserves_params() {
        let exec = FunctionExec {
            code: "let y = 1;".to_string(),
        };
        let out = eval(&exec, &Map::new(), &json!({"x": 1})).unwrap();
        assert_eq!(out.params, json!({"x": 1}));
    }

    #[test]
    fn mutates_env_and_reads_it_back() {
        let mut env = Map::new();
        env.insert("x".to_string(), json!(1));
        let exec = FunctionExec {
            code: "x = x + 1; x".to_string(),
        };
        let out = eval(&exec, &env, &json!({})).unwrap();
        assert_eq!(out.params, json!(2));
        assert_eq!(out.env.get("x"), Some(&json!(2)));
    }
}
