//! Stage outcome types for aggregation runs.

use chrono::{DateTime, Utc};
use rlcf_council::{BiasAnalysis, ConsensusResult};
use serde::Serialize;

/// The result of one pipeline stage.
///
/// Stages commit independently: a failed stage never undoes an earlier
/// committed one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    /// The stage ran and its effects are committed.
    Committed {
        /// What the stage produced.
        value: T,
    },

    /// The stage ran and failed; nothing of it was committed.
    Failed {
        /// Error description.
        error: String,
    },

    /// The stage did not run because an earlier stage it depends on failed.
    Skipped {
        /// Why it was skipped.
        reason: String,
    },
}

impl<T> StageOutcome<T> {
    /// Create a Committed outcome.
    pub fn committed(value: T) -> Self {
        Self::Committed { value }
    }

    /// Create a Failed outcome.
    pub fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    /// Create a Skipped outcome.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Returns true if the stage committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Returns true if the stage failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The committed value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Committed { value } => Some(value),
            _ => None,
        }
    }
}

/// Scores and authority change for one feedback entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryScore {
    /// Scored entry.
    pub entry_id: String,
    /// Its evaluator.
    pub evaluator_id: String,
    /// Agreement with the consensus.
    pub consistency: f64,
    /// Agreement with ground truth, when the task has one.
    pub correctness: Option<f64>,
    /// Quality fed into the track record.
    pub quality: f64,
    /// Authority before the update.
    pub authority_before: f64,
    /// Authority after the update.
    pub authority_after: f64,
}

/// Everything one aggregation run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationOutcome {
    /// Aggregated task.
    pub task_id: String,
    /// Consensus stage.
    pub consensus: StageOutcome<ConsensusResult>,
    /// Scoring and authority stage.
    pub scoring: StageOutcome<Vec<EntryScore>>,
    /// Bias stage.
    pub bias: StageOutcome<BiasAnalysis>,
    /// When the last stage finished.
    pub finished_at: DateTime<Utc>,
}

impl AggregationOutcome {
    /// Returns true if every stage committed.
    pub fn is_complete(&self) -> bool {
        self.consensus.is_committed() && self.scoring.is_committed() && self.bias.is_committed()
    }

    /// Names of the stages that failed.
    pub fn failed_stages(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if self.consensus.is_failed() {
            failed.push("consensus");
        }
        if self.scoring.is_failed() {
            failed.push("scoring");
        }
        if self.bias.is_failed() {
            failed.push("bias");
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_helpers() {
        let ok: StageOutcome<u32> = StageOutcome::committed(3);
        assert!(ok.is_committed());
        assert_eq!(ok.value(), Some(&3));

        let failed: StageOutcome<u32> = StageOutcome::failed("boom");
        assert!(failed.is_failed());
        assert_eq!(failed.value(), None);

        let skipped: StageOutcome<u32> = StageOutcome::skipped("consensus failed");
        assert!(!skipped.is_committed() && !skipped.is_failed());
    }

    #[test]
    fn test_stage_serialization() {
        let failed: StageOutcome<u32> = StageOutcome::failed("boom");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
