use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the cascade-core library.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Static issue with a workflow definition (cycles, dangling edges,
    /// missing required mappings).
    #[error("validation error: {0}")]
    Validation(String),

    /// User lacks the permission required for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Workflow or execution id unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// No language runner matches the project directory.
    #[error("no runner available: {0}")]
    NoRunner(String),

    /// Execution or workflow store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Subprocess spawn or supervision failure.
    #[error("process error: {0}")]
    Process(String),

    /// Language runner failure outside build/execute results.
    #[error("runner error: {0}")]
    Runner(String),

    /// Project materialization or scratch directory failure.
    #[error("project error: {0}")]
    Project(String),

    /// Configuration parse or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Closed error taxonomy carried in node and execution results.
///
/// This is the classification persisted on [`crate::model::NodeExecutionError`]
/// and execution-level failures; [`EngineError`] is the synchronous API
/// counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorType {
    ValidationError,
    PermissionDenied,
    NotFound,
    NoRunnerAvailable,
    BuildFailed,
    ExecutionError,
    Timeout,
    Cancelled,
    SystemError,
}

impl NodeErrorType {
    /// Whether failures of this kind are eligible for node-level retry
    /// (still bounded by the node's `max_retries`).
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            NodeErrorType::Cancelled | NodeErrorType::PermissionDenied | NodeErrorType::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = EngineError::Validation("workflow contains a cycle".into());
        assert_eq!(err.to_string(), "validation error: workflow contains a cycle");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!NodeErrorType::Cancelled.is_retryable());
        assert!(NodeErrorType::BuildFailed.is_retryable());
        assert!(NodeErrorType::ExecutionError.is_retryable());
    }
}
