//! # RLCF Core
//!
//! Unified facade for the community feedback learning loop.
//! Orchestrates the weight store, the evaluation council and the learner.
//!
//! ## Lifecycle
//!
//! | Step | Operation | Task status |
//! |------|-----------|-------------|
//! | Create | `create_task`, `add_response` | `open` |
//! | Collect | `start_evaluation`, `submit_feedback` | `blind_evaluation` |
//! | Aggregate | `trigger_aggregation` | `aggregated` |
//! | Close | `close_task` | `closed` |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          RLCF CORE                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │                    ┌─────────────────┐                          │
//! │                    │    Feedback     │  ← Unified Facade        │
//! │                    │    Pipeline     │                          │
//! │                    └────────┬────────┘                          │
//! │                             │                                   │
//! │         ┌───────────────────┼───────────────────┐               │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐          │
//! │  │   Weight    │◄───│  Evaluation │    │   Weight    │          │
//! │  │    Store    │    │   Council   │    │   Learner   │          │
//! │  └─────────────┘    └─────────────┘    └─────────────┘          │
//! │         ▲                                      │                │
//! │         └──────────────────────────────────────┘                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rlcf_core::{FeedbackPipeline, RlcfConfig};
//!
//! let pipeline = FeedbackPipeline::new(RlcfConfig::from_file("rlcf.toml")?)?;
//! let task = pipeline.create_task(TaskType::Qa, input, None)?;
//! // ... responses, blind evaluation, feedback ...
//! let outcome = pipeline.trigger_aggregation(&task.id)?;
//! for stage in outcome.failed_stages() {
//!     escalate(stage);
//! }
//! ```
//!
//! ## Notes
//!
//! - Aggregation stages commit independently: consensus, then scoring, then bias
//! - Aggregating a task without feedback fails with `NoFeedback` and leaves it untouched
//! - Rejected feedback never changes an evaluator's authority
//!
//! ## References
//!
//! - RLCF: Reinforcement Learning from Community Feedback
//! - Evaluation Council: authority-weighted consensus and bias audit
//! - Weight Learner: bounded gradient steps on the shared weight document

mod audit;
mod config;
mod error;
mod outcome;
mod pipeline;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{GlobalConfig, RlcfConfig, StorageConfig};
pub use error::RlcfError;
pub use outcome::{AggregationOutcome, EntryScore, StageOutcome};
pub use pipeline::FeedbackPipeline;

// Re-export component types for convenience
pub use rlcf_council::{
    BiasAnalysis, BiasDimension, ConsensusResult, Credential, Evaluator, FeedbackEntry,
    FeedbackPayload, Task, TaskStatus, TaskType,
};
pub use rlcf_learning::{ExperimentTracker, FeedbackSignal, LearningOutcome, WeightLearner};
pub use rlcf_weights::{ConfigSource, RuntimeWeights, WeightCategory, WeightConfig, WeightStore};

/// Core result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RlcfError>;

#[cfg(test)]
mod tests;
