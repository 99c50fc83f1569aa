//! Error types for the feedback council.
//!
//! Covers payload validation, aggregation over empty or mixed feedback,
//! evaluator lookup and task lifecycle violations.

use crate::models::{TaskStatus, TaskType};
use thiserror::Error;

/// Errors that can occur during council operations.
#[derive(Debug, Error)]
pub enum CouncilError {
    /// Aggregation was invoked with zero feedback entries.
    #[error("No feedback to aggregate for {0} task")]
    NoFeedback(TaskType),

    /// Feedback for one task carried payloads of different task types.
    #[error("Mixed task types: expected {expected}, found {found}")]
    MixedTaskTypes {
        /// Task type the strategy handles.
        expected: TaskType,
        /// Offending payload type.
        found: TaskType,
    },

    /// A feedback payload or rating is malformed or missing a required field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The evaluator has not been registered.
    #[error("Unknown evaluator: {0}")]
    UnknownEvaluator(String),

    /// A task lifecycle transition that is not allowed.
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// A per-evaluator lock was poisoned by a panicking writer.
    #[error("Evaluator lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal council error.
    #[error("Internal council error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_feedback_display() {
        let err = CouncilError::NoFeedback(TaskType::Nli);
        assert_eq!(err.to_string(), "No feedback to aggregate for nli task");
    }

    #[test]
    fn test_mixed_task_types_display() {
        let err = CouncilError::MixedTaskTypes {
            expected: TaskType::Qa,
            found: TaskType::Ner,
        };
        assert!(err.to_string().contains("expected qa"));
        assert!(err.to_string().contains("found ner"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = CouncilError::InvalidTransition {
            from: TaskStatus::Open,
            to: TaskStatus::Closed,
        };
        assert_eq!(
            err.to_string(),
            "Invalid task transition from open to closed"
        );
    }

    #[test]
    fn test_validation_display() {
        let err = CouncilError::Validation("missing field `position`".to_string());
        assert!(err.to_string().contains("position"));
    }
}
