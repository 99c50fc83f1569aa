//! # Weight Learner
//!
//! Turns feedback signals into bounded updates of the weight document.
//!
//! ## Update Rule
//!
//! For every learnable weight a signal touches:
//!
//! ```text
//! g  ← clip(gradient(signal), −gradient_clip, +gradient_clip)
//! w  ← clamp(w + learning_rate · authority · g, lower, upper)
//! ```
//!
//! Signals from evaluators whose authority is below `min_authority` are
//! skipped. Out-of-bounds steps are clamped, never rejected.
//!
//! ## Gradients
//!
//! | Signal | Weight(s) | Gradient |
//! |--------|-----------|----------|
//! | Retrieval | `retrieval.alpha` | `(mean(relevance) − 0.5) · side(alpha)` |
//! | ExpertTraversal | `expert_traversal.{expert}.{relation}` | `usefulness − 0.5` |
//! | Authority | `rlcf.{baseline_credentials, track_record, recent_performance}` | `accuracy_i − mean(accuracy)` |
//! | Gating | `gating.expert_priors.{expert}` | `reward − 0.5` |
//!
//! `side(alpha)` is +1 when alpha sits at or above the midpoint of its
//! bounds and −1 below it, so good retrieval pushes alpha further toward the
//! end it already leans to.
//!
//! ## Persistence
//!
//! With an experiment id the updated document is saved as a new version in
//! that experiment's scope. Without one it becomes the process-wide runtime
//! override, visible to every store sharing the runtime state.

use crate::error::{LearningError, Result};
use rlcf_weights::{LearnableWeight, TraversalWeight, WeightCategory, WeightConfig, WeightStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Configuration for the weight learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Signals from evaluators below this authority are ignored.
    pub min_authority: f64,
    /// Absolute cap on a single gradient component.
    pub gradient_clip: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            min_authority: 0.3,
            gradient_clip: 1.0,
        }
    }
}

impl LearnerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum authority.
    #[must_use]
    pub fn with_min_authority(mut self, min_authority: f64) -> Self {
        self.min_authority = min_authority;
        self
    }

    /// Sets the gradient clip.
    #[must_use]
    pub fn with_gradient_clip(mut self, clip: f64) -> Self {
        self.gradient_clip = clip;
        self
    }
}

/// A learning signal, tagged with the category it updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum FeedbackSignal {
    /// Relevance of retrieved items, each in [0, 1].
    Retrieval {
        /// Per-item relevance judgements.
        relevance_scores: Vec<f64>,
        /// Authority of the judging evaluator.
        authority: f64,
    },
    /// Usefulness of following one relation for one expert.
    ExpertTraversal {
        /// Expert name.
        expert: String,
        /// Relation type.
        relation: String,
        /// Usefulness in [0, 1].
        usefulness: f64,
        /// Authority of the judging evaluator.
        authority: f64,
    },
    /// How accurate each authority component was for a judged evaluator.
    #[serde(rename = "rlcf")]
    Authority {
        /// Accuracy attributed to the baseline credentials.
        baseline_accuracy: f64,
        /// Accuracy attributed to the track record.
        track_record_accuracy: f64,
        /// Accuracy attributed to recent performance.
        recent_accuracy: f64,
        /// Authority of the judging evaluator.
        authority: f64,
    },
    /// Reward for routing to an expert.
    Gating {
        /// Expert name.
        expert: String,
        /// Reward in [0, 1].
        reward: f64,
        /// Authority of the judging evaluator.
        authority: f64,
    },
}

impl FeedbackSignal {
    /// Parses a signal from its JSON form, e.g.
    /// `{"category": "gating", "expert": "literal", "reward": 1.0, "authority": 0.8}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let signal: FeedbackSignal = serde_json::from_str(json)
            .map_err(|e| LearningError::InvalidSignal(e.to_string()))?;
        signal.check()?;
        Ok(signal)
    }

    /// Category this signal updates.
    pub fn category(&self) -> WeightCategory {
        match self {
            FeedbackSignal::Retrieval { .. } => WeightCategory::Retrieval,
            FeedbackSignal::ExpertTraversal { .. } => WeightCategory::ExpertTraversal,
            FeedbackSignal::Authority { .. } => WeightCategory::Rlcf,
            FeedbackSignal::Gating { .. } => WeightCategory::Gating,
        }
    }

    /// Authority of the evaluator behind the signal.
    pub fn authority(&self) -> f64 {
        match self {
            FeedbackSignal::Retrieval { authority, .. }
            | FeedbackSignal::ExpertTraversal { authority, .. }
            | FeedbackSignal::Authority { authority, .. }
            | FeedbackSignal::Gating { authority, .. } => *authority,
        }
    }

    fn check(&self) -> Result<()> {
        let values: Vec<f64> = match self {
            FeedbackSignal::Retrieval {
                relevance_scores, ..
            } => {
                if relevance_scores.is_empty() {
                    return Err(LearningError::InvalidSignal(
                        "retrieval signal carries no relevance scores".to_string(),
                    ));
                }
                relevance_scores.clone()
            }
            FeedbackSignal::ExpertTraversal { usefulness, .. } => vec![*usefulness],
            FeedbackSignal::Authority {
                baseline_accuracy,
                track_record_accuracy,
                recent_accuracy,
                ..
            } => vec![*baseline_accuracy, *track_record_accuracy, *recent_accuracy],
            FeedbackSignal::Gating { reward, .. } => vec![*reward],
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(LearningError::InvalidSignal(format!(
                "{} signal contains a non-finite value",
                self.category()
            )));
        }
        Ok(())
    }
}

/// Why a signal did not move any weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Authority below `min_authority` (or not a number).
    LowAuthority {
        /// The signal's authority.
        authority: f64,
        /// The configured minimum.
        min_authority: f64,
    },
    /// Every weight the signal addresses is frozen or fixed.
    NotLearnable,
}

/// One weight moved by an update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedUpdate {
    /// Dotted path of the weight.
    pub name: String,
    /// Clipped gradient.
    pub gradient: f64,
    /// Value before the step.
    pub before: f64,
    /// Value after the step, inside bounds.
    pub after: f64,
}

/// Where an update was published.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Publication {
    /// Saved as a version in an experiment scope.
    Experiment {
        /// Scope id the version was saved under.
        experiment_id: String,
        /// Revision of the saved version.
        revision: u64,
    },
    /// Installed as the runtime override.
    RuntimeOverride {
        /// Runtime generation after the reload.
        generation: u64,
    },
}

/// Result of a learning call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LearningOutcome {
    /// Nothing changed.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
    /// Weights moved and the document was published.
    Applied {
        /// Individual weight moves.
        updates: Vec<AppliedUpdate>,
        /// Where the new document went.
        publication: Publication,
    },
}

impl LearningOutcome {
    /// Returns true if the update moved weights.
    pub fn is_applied(&self) -> bool {
        matches!(self, LearningOutcome::Applied { .. })
    }

    /// The weight moves, empty when skipped.
    pub fn updates(&self) -> &[AppliedUpdate] {
        match self {
            LearningOutcome::Applied { updates, .. } => updates,
            LearningOutcome::Skipped { .. } => &[],
        }
    }
}

/// Result of a batch update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Signals that moved weights.
    pub applied: usize,
    /// Signals that were skipped.
    pub skipped: Vec<(usize, SkipReason)>,
    /// All weight moves, in signal order.
    pub updates: Vec<AppliedUpdate>,
    /// Where the folded document went, if anything moved.
    pub publication: Option<Publication>,
}

/// Learns bounded weight updates from feedback signals.
///
/// Updates are read-modify-write on the resolved document; the learner
/// serializes its own writers so concurrent signals are folded one after
/// another.
///
/// # Example
///
/// ```rust
/// use rlcf_learning::{FeedbackSignal, LearnerConfig, WeightLearner};
/// use rlcf_weights::{WeightCategory, WeightStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(WeightStore::temporary().unwrap());
/// let learner = WeightLearner::new(store.clone(), LearnerConfig::default());
///
/// let signal = FeedbackSignal::Gating { expert: "literal".into(), reward: 1.0, authority: 0.8 };
/// let outcome = learner
///     .update_from_feedback(WeightCategory::Gating, &signal, Some("exp-1"))
///     .unwrap();
/// assert!(outcome.is_applied());
///
/// let prior = &store.get_config(Some("exp-1")).unwrap().gating.expert_priors["literal"];
/// assert!(prior.current() > prior.default);
/// ```
pub struct WeightLearner {
    store: Arc<WeightStore>,
    config: LearnerConfig,
    write_lock: Mutex<()>,
}

impl WeightLearner {
    /// Creates a learner writing through `store`.
    pub fn new(store: Arc<WeightStore>, config: LearnerConfig) -> Self {
        Self {
            store,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// The learner's configuration.
    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// The store the learner writes through.
    pub fn store(&self) -> &Arc<WeightStore> {
        &self.store
    }

    /// Applies one signal and publishes the result.
    ///
    /// # Errors
    ///
    /// - `CategoryMismatch` if the signal belongs to another category
    /// - `InvalidSignal` for empty or non-finite signals
    /// - `UnknownWeight` if the signal names a missing expert or relation
    /// - `Weights` if persisting fails
    pub fn update_from_feedback(
        &self,
        category: WeightCategory,
        signal: &FeedbackSignal,
        experiment_id: Option<&str>,
    ) -> Result<LearningOutcome> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LearningError::LockPoisoned("weight learner".to_string()))?;

        let mut config = (*self.store.get_config(experiment_id)?).clone();
        match self.apply(&mut config, category, signal)? {
            Step::Skipped(reason) => {
                debug!("Skipped {} signal: {:?}", category, reason);
                Ok(LearningOutcome::Skipped { reason })
            }
            Step::Applied(updates) => {
                let publication = self.publish(config, experiment_id, &updates)?;
                Ok(LearningOutcome::Applied {
                    updates,
                    publication,
                })
            }
        }
    }

    /// Folds signals into one document, in order, and publishes once.
    ///
    /// Each signal sees the weights as left by the previous one. Any error
    /// aborts the batch before anything is published.
    pub fn batch_update(
        &self,
        category: WeightCategory,
        signals: &[FeedbackSignal],
        experiment_id: Option<&str>,
    ) -> Result<BatchOutcome> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LearningError::LockPoisoned("weight learner".to_string()))?;

        let mut config = (*self.store.get_config(experiment_id)?).clone();
        let mut outcome = BatchOutcome {
            applied: 0,
            skipped: Vec::new(),
            updates: Vec::new(),
            publication: None,
        };

        for (index, signal) in signals.iter().enumerate() {
            match self.apply(&mut config, category, signal)? {
                Step::Skipped(reason) => outcome.skipped.push((index, reason)),
                Step::Applied(updates) => {
                    outcome.applied += 1;
                    outcome.updates.extend(updates);
                }
            }
        }

        if outcome.applied > 0 {
            outcome.publication = Some(self.publish(config, experiment_id, &outcome.updates)?);
        }
        info!(
            "Batch {} update: {} applied, {} skipped",
            category,
            outcome.applied,
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    fn apply(
        &self,
        config: &mut WeightConfig,
        category: WeightCategory,
        signal: &FeedbackSignal,
    ) -> Result<Step> {
        if signal.category() != category {
            return Err(LearningError::CategoryMismatch {
                expected: category,
                found: signal.category(),
            });
        }
        signal.check()?;

        let authority = signal.authority();
        if authority.is_nan() || authority < self.config.min_authority {
            return Ok(Step::Skipped(SkipReason::LowAuthority {
                authority,
                min_authority: self.config.min_authority,
            }));
        }

        let mut updates = Vec::new();
        match signal {
            FeedbackSignal::Retrieval {
                relevance_scores, ..
            } => {
                let alpha = &mut config.retrieval.alpha;
                let mean = relevance_scores.iter().sum::<f64>() / relevance_scores.len() as f64;
                let side = if alpha.current() >= alpha.midpoint() { 1.0 } else { -1.0 };
                self.step(alpha, "retrieval.alpha", (mean - 0.5) * side, authority, &mut updates);
            }
            FeedbackSignal::ExpertTraversal {
                expert,
                relation,
                usefulness,
                ..
            } => {
                let name = format!("expert_traversal.{}.{}", expert, relation);
                let weight = config
                    .expert_traversal
                    .get_mut(expert)
                    .and_then(|relations| relations.get_mut(relation))
                    .ok_or_else(|| LearningError::UnknownWeight(name.clone()))?;
                if let TraversalWeight::Learnable(weight) = weight {
                    self.step(weight, &name, usefulness - 0.5, authority, &mut updates);
                }
            }
            FeedbackSignal::Authority {
                baseline_accuracy,
                track_record_accuracy,
                recent_accuracy,
                ..
            } => {
                let mean = (baseline_accuracy + track_record_accuracy + recent_accuracy) / 3.0;
                let rlcf = &mut config.rlcf;
                self.step(
                    &mut rlcf.baseline_credentials,
                    "rlcf.baseline_credentials",
                    baseline_accuracy - mean,
                    authority,
                    &mut updates,
                );
                self.step(
                    &mut rlcf.track_record,
                    "rlcf.track_record",
                    track_record_accuracy - mean,
                    authority,
                    &mut updates,
                );
                self.step(
                    &mut rlcf.recent_performance,
                    "rlcf.recent_performance",
                    recent_accuracy - mean,
                    authority,
                    &mut updates,
                );
            }
            FeedbackSignal::Gating { expert, reward, .. } => {
                let name = format!("gating.expert_priors.{}", expert);
                let prior = config
                    .gating
                    .expert_priors
                    .get_mut(expert)
                    .ok_or_else(|| LearningError::UnknownWeight(name.clone()))?;
                self.step(prior, &name, reward - 0.5, authority, &mut updates);
            }
        }

        if updates.is_empty() {
            return Ok(Step::Skipped(SkipReason::NotLearnable));
        }
        Ok(Step::Applied(updates))
    }

    fn step(
        &self,
        weight: &mut LearnableWeight,
        name: &str,
        gradient: f64,
        authority: f64,
        updates: &mut Vec<AppliedUpdate>,
    ) {
        if !weight.learnable {
            return;
        }
        let clip = self.config.gradient_clip.abs();
        let gradient = gradient.clamp(-clip, clip);
        let before = weight.current();
        let after = weight.set_value(before + weight.learning_rate * authority * gradient);
        updates.push(AppliedUpdate {
            name: name.to_string(),
            gradient,
            before,
            after,
        });
    }

    fn publish(
        &self,
        config: WeightConfig,
        experiment_id: Option<&str>,
        updates: &[AppliedUpdate],
    ) -> Result<Publication> {
        match experiment_id {
            Some(experiment_id) => {
                let metrics: BTreeMap<String, f64> = updates
                    .iter()
                    .map(|u| (u.name.clone(), u.after - u.before))
                    .collect();
                let version = self.store.save(config, Some(experiment_id), metrics)?;
                Ok(Publication::Experiment {
                    experiment_id: experiment_id.to_string(),
                    revision: version.revision,
                })
            }
            None => {
                let generation = self.store.runtime().reload(config)?;
                info!(
                    "Published {} weight updates as runtime override (generation {})",
                    updates.len(),
                    generation
                );
                Ok(Publication::RuntimeOverride { generation })
            }
        }
    }
}

impl std::fmt::Debug for WeightLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightLearner")
            .field("config", &self.config)
            .finish()
    }
}

enum Step {
    Skipped(SkipReason),
    Applied(Vec<AppliedUpdate>),
}
