//! Error types for model records

use thiserror::Error;

/// Error type for model record operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// An action id string did not have the `job@name` shape
    #[error("invalid action id: {0}")]
    InvalidActionId(String),

    /// A status transition not allowed by the state machine
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// A required record field was empty
    #[error("missing field: {0}")]
    MissingField(String),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::InvalidActionId("bogus".to_string());
        assert_eq!(err.to_string(), "invalid action id: bogus");

        let err = ModelError::IllegalTransition {
            from: "OK".to_string(),
            to: "RUNNING".to_string(),
        };
        assert_eq!(err.to_string(), "illegal transition from OK to RUNNING");
    }
}
