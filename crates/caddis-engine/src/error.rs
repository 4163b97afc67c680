//! Error types for the lifecycle engine
//!
//! `Precondition` is special: it is the lightweight signal a command raises
//! when it finds its state-machine precondition unmet. It aborts the command
//! without mutating the store and is expected under concurrent recovery
//! sweeps, so the dispatcher logs it at debug, not error.

use caddis_actions::ExecutorError;
use caddis_model::ModelError;
use thiserror::Error;

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Command precondition unmet; aborted without side effects
    #[error("precondition unmet: {0}")]
    Precondition(String),

    /// Job record missing from the store
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Action record missing from the store
    #[error("action not found: {0}")]
    ActionNotFound(String),

    /// No executor registered for the action type
    #[error("no executor registered for action type: {0}")]
    ExecutorMissing(String),

    /// The command queue is at capacity
    #[error("command queue full")]
    QueueFull,

    /// Store gateway failure
    #[error("store error: {0}")]
    Store(String),

    /// Executor rejected an operation (e.g. an attribute update)
    #[error("executor error: {0}")]
    Executor(ExecutorError),

    /// Model-level violation (illegal transition, bad id)
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Raise a precondition signal unless `cond` holds
pub(crate) fn precondition(cond: bool, msg: impl Into<String>) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(EngineError::Precondition(msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Precondition("action not pending".to_string());
        assert_eq!(err.to_string(), "precondition unmet: action not pending");

        let err = EngineError::QueueFull;
        assert_eq!(err.to_string(), "command queue full");
    }

    #[test]
    fn test_precondition_helper() {
        assert!(precondition(true, "fine").is_ok());
        let err = precondition(false, "not startable").unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
    }

    #[test]
    fn test_model_error_converts() {
        let model_err = ModelError::InvalidActionId("x".to_string());
        let err: EngineError = model_err.into();
        assert!(matches!(err, EngineError::Model(_)));
    }
}
