//! Error types for the RLCF core.

use thiserror::Error;

/// Core error type for pipeline operations.
#[derive(Debug, Error)]
pub enum RlcfError {
    /// The task id is not known to the pipeline.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The response id is not known, or belongs to another task.
    #[error("Unknown response {response_id} for task {task_id}")]
    UnknownResponse {
        /// Task the feedback targets.
        task_id: String,
        /// Offending response id.
        response_id: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing TOML configuration failed.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Rendering TOML configuration failed.
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),

    /// The audit sink rejected a record.
    #[error("Audit error: {0}")]
    Audit(String),

    /// Weight storage error passthrough.
    #[error("Weight error: {0}")]
    Weights(#[from] rlcf_weights::WeightError),

    /// Council error passthrough.
    #[error("Council error: {0}")]
    Council(#[from] rlcf_council::CouncilError),

    /// Learning error passthrough.
    #[error("Learning error: {0}")]
    Learning(#[from] rlcf_learning::LearningError),
}

impl RlcfError {
    /// Returns true for the aggregation-on-empty-task marker.
    pub fn is_no_feedback(&self) -> bool {
        matches!(
            self,
            RlcfError::Council(rlcf_council::CouncilError::NoFeedback(_))
        )
    }

    /// Returns true when a submission was rejected as malformed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RlcfError::Council(rlcf_council::CouncilError::Validation(_))
        )
    }
}
