//! # RLCF Learning
//!
//! Closes the feedback loop: community signals nudge the weight document,
//! and experiments decide which document becomes the default.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`WeightLearner`] | Clipped, authority-scaled, bounded weight updates |
//! | [`ExperimentTracker`] | Allocation, deterministic assignment, analysis, promotion |
//!
//! ## Quick Start
//!
//! ```rust
//! use rlcf_learning::{ExperimentConfig, ExperimentTracker, FeedbackSignal, LearnerConfig, WeightLearner};
//! use rlcf_weights::{WeightCategory, WeightConfig, WeightStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(WeightStore::temporary()?);
//! let tracker = ExperimentTracker::new(store.clone(), ExperimentConfig::default());
//! let learner = WeightLearner::new(store.clone(), LearnerConfig::default());
//!
//! let id = tracker.create(
//!     "retrieval balance",
//!     vec![
//!         ("control".to_string(), WeightConfig::default()),
//!         ("treatment".to_string(), WeightConfig::default()),
//!     ],
//!     &[0.5, 0.5],
//! )?;
//! tracker.start(&id)?;
//!
//! // Learn inside the subject's variant.
//! let (scope, _) = tracker.config_for(&id, "user-42")?;
//! let signal = FeedbackSignal::Retrieval { relevance_scores: vec![0.9, 0.7], authority: 0.8 };
//! learner.update_from_feedback(WeightCategory::Retrieval, &signal, Some(&scope))?;
//! # Ok::<(), rlcf_learning::LearningError>(())
//! ```
//!
//! ## References
//!
//! - Kohavi, R., Longbotham, R. (2017). "Online Controlled Experiments and A/B Testing"
//!   *Encyclopedia of Machine Learning and Data Mining*, 922-929.
//! - Pascanu, R., Mikolov, T., Bengio, Y. (2013). "On the difficulty of training
//!   recurrent neural networks" (gradient clipping)

mod error;
mod experiment;
mod learner;

pub use error::{LearningError, Result};
pub use experiment::{
    assignment_point, select_variant, validate_allocation, variant_scope, Experiment,
    ExperimentAnalysis, ExperimentConfig, ExperimentStatus, ExperimentTracker, Variant,
    VariantStats, ASSIGNMENT_BUCKETS,
};
pub use learner::{
    AppliedUpdate, BatchOutcome, FeedbackSignal, LearnerConfig, LearningOutcome, Publication,
    SkipReason, WeightLearner,
};
