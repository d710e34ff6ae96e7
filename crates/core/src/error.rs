//! Error model shared by the orchestration crates.

use thiserror::Error;

/// Result type used across the core layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Covers deterministic failures that a caller can act on: rejected state
/// transitions, unknown identifiers and invalid input. Failures raised by step
/// or subscriber code never surface as `CoreError`; they are recorded on the
/// job or logged by the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A state machine refused an operation in its current state.
    #[error("illegal transition: cannot {action} {entity} while {from}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// A value failed validation (e.g. a job without steps).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflicting instance or registration already exists.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn illegal_transition(
        entity: &'static str,
        from: impl core::fmt::Display,
        action: &'static str,
    ) -> Self {
        Self::IllegalTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_names_entity_state_and_action() {
        let err = CoreError::illegal_transition("job", "COMPLETED", "resume");
        assert_eq!(
            err.to_string(),
            "illegal transition: cannot resume job while COMPLETED"
        );
    }
}
