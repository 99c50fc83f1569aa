//! # Authority Model
//!
//! Converts an evaluator's credentials and feedback history into the scalar
//! authority that weights their feedback.
//!
//! ## Formulas
//!
//! | Quantity | Definition |
//! |----------|------------|
//! | Baseline `B` | `Σ weight_i · score_i` over credentials with a configured rule |
//! | Quality `q` | mean of helpfulness, accuracy, consistency, community helpfulness |
//! | Track record `T` | `T ← (1 − λ)·T + λ·q` |
//! | Authority `A` | `α·min(B, 1) + β·T + γ·R`, clamped to `[0, α⁺ + β⁺ + γ⁺]` |
//!
//! α, β, γ and λ come from the `rlcf` category of the weight document, so
//! the learner can move the combination within its bounds. `α⁺` denotes the
//! upper bound of α.
//!
//! ## Concurrency
//!
//! The model itself is pure. Mutations of a stored evaluator go through
//! [`EvaluatorRegistry::update`], which serializes them per evaluator.

pub mod credentials;
pub mod expression;
pub mod registry;

pub use credentials::{default_rules, CredentialRule, CredentialScoring};
pub use registry::EvaluatorRegistry;

use crate::models::{Evaluator, FeedbackEntry, FeedbackRatings};
use rlcf_weights::RlcfWeights;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Neutral value for a missing rating or score.
const NEUTRAL: f64 = 0.5;

/// Configuration for the authority model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Scoring rule per credential kind.
    pub credential_rules: BTreeMap<String, CredentialRule>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            credential_rules: default_rules(),
        }
    }
}

impl AuthorityConfig {
    /// Adds or replaces the rule for a credential kind.
    #[must_use]
    pub fn with_rule(mut self, kind: impl Into<String>, rule: CredentialRule) -> Self {
        self.credential_rules.insert(kind.into(), rule);
        self
    }

    /// Drops every rule.
    #[must_use]
    pub fn without_rules(mut self) -> Self {
        self.credential_rules.clear();
        self
    }
}

/// Authority scoring.
///
/// # Example
///
/// ```rust
/// use rlcf_council::{AuthorityModel, Credential, Evaluator};
/// use rlcf_weights::WeightConfig;
///
/// let model = AuthorityModel::default();
/// let weights = WeightConfig::default().rlcf;
/// let mut evaluator = Evaluator::new("e1", vec![Credential::text("academic_degree", "PhD")]);
///
/// model.refresh_baseline(&mut evaluator);
/// assert!((evaluator.baseline_credential_score - 0.45).abs() < 1e-9);
///
/// let authority = model.update_authority(&mut evaluator, 0.5, &weights);
/// assert!(authority > 0.0 && authority <= weights.authority_ceiling());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AuthorityModel {
    config: AuthorityConfig,
}

impl AuthorityModel {
    /// Creates a model with the given configuration.
    pub fn new(config: AuthorityConfig) -> Self {
        for (kind, rule) in &config.credential_rules {
            if let Err(e) = rule.check() {
                warn!("Credential rule '{}' will score 0: {}", kind, e);
            }
        }
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// Weighted credential score. Unconfigured kinds are ignored and failing
    /// rules contribute 0.
    pub fn baseline_credentials(&self, evaluator: &Evaluator) -> f64 {
        evaluator
            .credentials
            .iter()
            .filter_map(|credential| {
                let rule = self.config.credential_rules.get(&credential.kind)?;
                Some(rule.weight * rule.score(&credential.kind, &credential.value))
            })
            .filter(|contribution| contribution.is_finite())
            .sum()
    }

    /// Recomputes and stores the baseline credential score.
    pub fn refresh_baseline(&self, evaluator: &mut Evaluator) -> f64 {
        evaluator.baseline_credential_score = self.baseline_credentials(evaluator);
        evaluator.baseline_credential_score
    }

    /// Quality of one feedback entry in [0, 1]. Never fails.
    pub fn quality_score(&self, entry: &FeedbackEntry) -> f64 {
        let ratings = &entry.ratings;
        let helpfulness = FeedbackRatings::normalize(ratings.helpfulness).unwrap_or(NEUTRAL);
        let accuracy = FeedbackRatings::normalize(ratings.accuracy).unwrap_or(NEUTRAL);
        let consistency = entry
            .consistency_score
            .filter(|s| s.is_finite())
            .map_or(NEUTRAL, |s| s.clamp(0.0, 1.0));
        let community =
            FeedbackRatings::normalize(ratings.community_helpfulness).unwrap_or(helpfulness);

        (helpfulness + accuracy + consistency + community) / 4.0
    }

    /// Applies one smoothing step toward `quality` and returns the new track record.
    pub fn update_track_record(
        &self,
        evaluator: &mut Evaluator,
        quality: f64,
        weights: &RlcfWeights,
    ) -> f64 {
        let lambda = weights.track_record_update_factor.clamp(0.0, 1.0);
        let quality = unit(quality);
        let previous = unit(evaluator.track_record_score);
        evaluator.track_record_score = ((1.0 - lambda) * previous + lambda * quality).clamp(0.0, 1.0);
        debug!(
            "Track record of {} moved {:.4} -> {:.4}",
            evaluator.id, previous, evaluator.track_record_score
        );
        evaluator.track_record_score
    }

    /// Recombines the authority score and returns it.
    pub fn update_authority(
        &self,
        evaluator: &mut Evaluator,
        recent_performance: f64,
        weights: &RlcfWeights,
    ) -> f64 {
        let alpha = weights.baseline_credentials.current();
        let beta = weights.track_record.current();
        let gamma = weights.recent_performance.current();

        let baseline = evaluator.baseline_credential_score.clamp(0.0, 1.0);
        let baseline = if baseline.is_nan() { 0.0 } else { baseline };
        let combined = alpha * baseline
            + beta * unit(evaluator.track_record_score)
            + gamma * unit(recent_performance);

        let ceiling = weights.authority_ceiling().max(0.0);
        evaluator.authority_score = if combined.is_finite() {
            combined.clamp(0.0, ceiling)
        } else {
            0.0
        };
        evaluator.authority_score
    }
}

/// Clamps into [0, 1]; NaN becomes the neutral value.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        NEUTRAL
    } else {
        value.clamp(0.0, 1.0)
    }
}
