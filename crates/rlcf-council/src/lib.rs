//! # Evaluation Council
//!
//! Turns community feedback on a task into an authority-weighted consensus,
//! scores each entry against that consensus and ground truth, audits the
//! feedback population for bias, and folds the outcome back into each
//! evaluator's authority.
//!
//! ## Overview
//!
//! Feedback from evaluators with stronger credentials and a better track
//! record should count for more, but never absolutely. Authority is a
//! bounded linear combination of three signals whose coefficients live in
//! the `rlcf` category of the shared weight document, so the learning loop
//! can move them.
//!
//! ## Architecture
//!
//! ```text
//!  feedback entries ──► ConsensusAggregator ──► ConsensusResult
//!         │                 (per task type)            │
//!         │                                            ▼
//!         ├──────────────► ConsistencyCorrectnessScorer ──► consistency / correctness
//!         │                                                       │
//!         ├──────────────► BiasDetector ──► BiasAnalysis          ▼
//!         │                                             AuthorityModel
//!         └──────────────────────────────────────────►  (quality, track record,
//!                                                        authority update)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Evaluators, tasks, typed feedback payloads, bias reports |
//! | [`authority`] | Credential scoring, authority formula, evaluator registry |
//! | [`consensus`] | Per-task-type aggregation strategies |
//! | [`scoring`] | Consistency and correctness scoring |
//! | [`bias`] | Six-dimension bias detection and mitigations |
//!
//! ## References
//!
//! - [Jaccard index](https://en.wikipedia.org/wiki/Jaccard_index) - Set and token overlap
//! - [Total variation distance](https://en.wikipedia.org/wiki/Total_variation_distance_of_probability_measures) - Temporal drift
//! - [Exponential smoothing](https://en.wikipedia.org/wiki/Exponential_smoothing) - Track record update

pub mod authority;
pub mod bias;
pub mod consensus;
pub mod error;
pub mod models;
pub mod scoring;

pub use authority::{
    default_rules, AuthorityConfig, AuthorityModel, CredentialRule, CredentialScoring,
    EvaluatorRegistry,
};
pub use bias::{
    BiasAnalysis, BiasConfig, BiasDetector, BiasDimension, BiasLevel, BiasSample, Mitigation,
    Priority,
};
pub use consensus::{
    AggregationConfig, AggregationStrategy, Alternative, ConsensusAggregator, ConsensusResult,
    FieldConsensus, WeightedFeedback,
};
pub use error::CouncilError;
pub use models::{
    BiasReport, ConfidenceLevel, Credential, CredentialValue, EntitySpan, Evaluator,
    FeedbackEntry, FeedbackPayload, FeedbackRatings, FieldValue, NliLabel, Position, Response,
    Task, TaskStatus, TaskType,
};
pub use scoring::{ConsistencyCorrectnessScorer, ScoringConfig};

/// Result type for council operations.
pub type Result<T> = std::result::Result<T, CouncilError>;
