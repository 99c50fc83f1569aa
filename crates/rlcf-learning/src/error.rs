//! Error types for weight learning and experiment tracking.

use crate::experiment::ExperimentStatus;
use rlcf_weights::{WeightCategory, WeightError};
use thiserror::Error;

/// Result type alias for learning operations.
pub type Result<T> = std::result::Result<T, LearningError>;

/// Errors that can occur while learning weights or running experiments.
#[derive(Debug, Error)]
pub enum LearningError {
    /// Weight storage or validation failed.
    #[error("Weight error: {0}")]
    Weights(#[from] WeightError),

    /// The signal does not belong to the requested category.
    #[error("signal for {found} cannot update the {expected} category")]
    CategoryMismatch {
        /// Category the caller asked to update
        expected: WeightCategory,
        /// Category the signal carries
        found: WeightCategory,
    },

    /// The signal is malformed (non-finite values, empty where required).
    #[error("invalid feedback signal: {0}")]
    InvalidSignal(String),

    /// The signal names a weight the document does not have.
    #[error("unknown weight: {0}")]
    UnknownWeight(String),

    /// Allocation ratios or variants are unacceptable.
    ///
    /// Creation is all-or-nothing: nothing is registered when this is returned.
    #[error("invalid allocation: {0}")]
    Allocation(String),

    /// No experiment with this id.
    #[error("unknown experiment: {0}")]
    UnknownExperiment(String),

    /// The experiment has no variant with this name.
    #[error("experiment {experiment} has no variant {variant}")]
    UnknownVariant {
        /// Experiment id
        experiment: String,
        /// Requested variant
        variant: String,
    },

    /// The lifecycle does not allow this transition.
    #[error("experiment cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: ExperimentStatus,
        /// Requested status
        to: ExperimentStatus,
    },

    /// The operation needs the experiment in another status.
    #[error("experiment {experiment} is {status}, expected running")]
    NotRunning {
        /// Experiment id
        experiment: String,
        /// Current status
        status: ExperimentStatus,
    },

    /// An outcome value is not a finite number.
    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LearningError::CategoryMismatch {
            expected: WeightCategory::Retrieval,
            found: WeightCategory::Gating,
        };
        assert_eq!(
            err.to_string(),
            "signal for gating cannot update the retrieval category"
        );

        let err = LearningError::InvalidTransition {
            from: ExperimentStatus::Completed,
            to: ExperimentStatus::Running,
        };
        assert_eq!(err.to_string(), "experiment cannot move from completed to running");
    }

    #[test]
    fn test_weight_error_passthrough() {
        let err: LearningError = WeightError::UnknownCategory("nope".to_string()).into();
        assert!(matches!(err, LearningError::Weights(_)));
        assert!(err.to_string().contains("nope"));
    }
}
