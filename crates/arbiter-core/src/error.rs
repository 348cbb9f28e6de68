//! Error types shared across the evaluation workspace.

use thiserror::Error;

/// Errors raised while invoking targets and scoring responses.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Invocation exceeded the configured timeout.
    #[error("invocation timed out")]
    Timeout,

    /// Invocation was cancelled from outside.
    #[error("invocation cancelled")]
    Cancelled,

    /// Provider/transport failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Batch response length did not match the request count.
    #[error("batch response length mismatch: expected {expected}, got {actual}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Timeout classification used by the retry policy: the dedicated
    /// variant, or any error whose message mentions a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            EvalError::Timeout => true,
            other => other.to_string().to_ascii_lowercase().contains("timeout"),
        }
    }
}

/// Result alias for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;
