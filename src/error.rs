//! Error types for the conductor

use thiserror::Error;

/// Result type for conductor operations
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Comprehensive error types for the conductor
#[derive(Error, Debug)]
pub enum ConductorError {
    /// The composition AST could not be compiled into an FSM
    #[error("compile error: {0}")]
    Compile(String),

    /// The interpreter reached a state it cannot make sense of
    ///
    /// Unlike a user error (which flows through `params.error`), this
    /// terminates the activation outright.
    #[error("internal error: {0}")]
    Internal(String),

    /// A `let`/`mask` or `try`/`exit` frame invariant was violated
    #[error("frame error: {0}")]
    Frame(String),

    /// A user `function` body failed to evaluate
    #[error("function evaluation error: {0}")]
    Eval(String),

    /// The external key/value store rejected or failed an operation
    #[error("store error: {0}")]
    Store(String),

    /// The action-invocation client failed to reach the platform
    #[error("invocation error: {0}")]
    Invocation(String),

    /// Configuration was missing or malformed at the point it was needed
    #[error("configuration error: {0}")]
    Config(String),

    /// A value failed to (de)serialize at a JSON boundary
    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serde(err.to_string())
    }
}

impl From<redis::RedisError> for ConductorError {
    fn from(err: redis::RedisError) -> Self {
        ConductorError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for ConductorError {
    fn from(err: reqwest::Error) -> Self {
        ConductorError::Invocation(err.to_string())
    }
}

impl From<envy::Error> for ConductorError {
    fn from(err: envy::Error) -> Self {
        ConductorError::Config(err.to_string())
    }
}
