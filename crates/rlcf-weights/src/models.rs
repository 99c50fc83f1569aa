//! # Core Data Models for Learnable Weights
//!
//! This module defines the weight document consumed by the retrieval and
//! expert-routing subsystems, and the error type shared by the whole crate.
//!
//! ## Document Shape
//!
//! ```text
//! version
//! retrieval         { alpha: LearnableWeight, over_retrieve_factor, max_graph_hops }
//! expert_traversal  { <expert>: { <relation>: number | LearnableWeight } }
//! rlcf              { baseline_credentials, track_record, recent_performance,
//!                     track_record_update_factor }
//! gating            { expert_priors: { <expert>: LearnableWeight },
//!                     query_type_modifiers: { <query_type>: { <expert>: number } } }
//! ```
//!
//! ## Invariants
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | `lower < default < upper` | [`LearnableWeight::new`], [`WeightConfig::validate`] |
//! | learned `value` inside `[lower, upper]` | [`LearnableWeight::set_value`] clamps |
//! | `learning_rate >= 0` | [`WeightConfig::validate`] |
//!
//! All maps are ordered (`BTreeMap`) so serialization is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A named scalar with a default, inclusive bounds and a learning rate.
///
/// `default` is the configured prior and never moves. Learning writes the
/// optional `value`, which is always clamped into `bounds`.
///
/// # Example
///
/// ```rust
/// use rlcf_weights::LearnableWeight;
///
/// let mut alpha = LearnableWeight::new(0.7, 0.3, 0.9).unwrap().with_learning_rate(0.01);
/// assert_eq!(alpha.current(), 0.7);
///
/// // Out-of-bounds updates are clamped, never rejected.
/// alpha.set_value(4.2);
/// assert_eq!(alpha.current(), 0.9);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnableWeight {
    /// Configured prior.
    pub default: f64,

    /// Inclusive `[lower, upper]` bounds.
    pub bounds: [f64; 2],

    /// Whether the learner may move this weight.
    #[serde(default = "default_learnable")]
    pub learnable: bool,

    /// Step size applied by the learner.
    #[serde(default)]
    pub learning_rate: f64,

    /// Learned position, if the learner has moved the weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

fn default_learnable() -> bool {
    true
}

impl LearnableWeight {
    /// Creates a learnable weight with zero learning rate.
    ///
    /// # Errors
    ///
    /// Returns `WeightError::InvalidWeight` unless `lower < default < upper`
    /// and all three are finite.
    pub fn new(default: f64, lower: f64, upper: f64) -> Result<Self> {
        let weight = Self {
            default,
            bounds: [lower, upper],
            learnable: true,
            learning_rate: 0.0,
            value: None,
        };
        weight.validate("weight")?;
        Ok(weight)
    }

    /// Sets the learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Marks the weight as fixed (the learner will not move it).
    #[must_use]
    pub fn frozen(mut self) -> Self {
        self.learnable = false;
        self
    }

    /// Lower bound (inclusive).
    pub fn lower(&self) -> f64 {
        self.bounds[0]
    }

    /// Upper bound (inclusive).
    pub fn upper(&self) -> f64 {
        self.bounds[1]
    }

    /// Centre of the bounds interval.
    pub fn midpoint(&self) -> f64 {
        (self.lower() + self.upper()) / 2.0
    }

    /// The value consumers should use: the learned value, else the default.
    pub fn current(&self) -> f64 {
        self.value.unwrap_or(self.default)
    }

    /// Clamps `candidate` into the bounds. NaN collapses to the lower bound.
    pub fn clamp(&self, candidate: f64) -> f64 {
        if candidate.is_nan() {
            return self.lower();
        }
        candidate.clamp(self.lower(), self.upper())
    }

    /// Stores a learned value, clamped into bounds, and returns what was stored.
    pub fn set_value(&mut self, candidate: f64) -> f64 {
        let clamped = self.clamp(candidate);
        self.value = Some(clamped);
        clamped
    }

    /// Drops any learned value, returning the weight to its default.
    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Checks the weight invariants, naming the weight in the error.
    pub fn validate(&self, name: &str) -> Result<()> {
        let [lower, upper] = self.bounds;
        let invalid = |reason: String| WeightError::InvalidWeight {
            name: name.to_string(),
            reason,
        };

        if !(self.default.is_finite() && lower.is_finite() && upper.is_finite()) {
            return Err(invalid("default and bounds must be finite".to_string()));
        }
        if !(lower < self.default && self.default < upper) {
            return Err(invalid(format!(
                "expected {} < {} < {}",
                lower, self.default, upper
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(invalid(format!(
                "learning rate {} must be a non-negative number",
                self.learning_rate
            )));
        }
        if let Some(value) = self.value {
            if !(lower..=upper).contains(&value) {
                return Err(invalid(format!(
                    "learned value {} outside [{}, {}]",
                    value, lower, upper
                )));
            }
        }
        Ok(())
    }
}

/// Retrieval balance parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalWeights {
    /// Balance between vector similarity and graph score.
    pub alpha: LearnableWeight,
    /// Candidates fetched per requested result before reranking.
    pub over_retrieve_factor: u32,
    /// Maximum graph expansion depth.
    pub max_graph_hops: u32,
}

/// A relation weight inside an expert's traversal table.
///
/// Plain numbers are fixed; objects are learnable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraversalWeight {
    /// Learnable relation weight.
    Learnable(LearnableWeight),
    /// Fixed relation weight.
    Fixed(f64),
}

impl TraversalWeight {
    /// The effective weight of the relation.
    pub fn current(&self) -> f64 {
        match self {
            TraversalWeight::Learnable(weight) => weight.current(),
            TraversalWeight::Fixed(value) => *value,
        }
    }
}

/// Relation weights for one expert, keyed by relation type.
pub type ExpertTraversal = BTreeMap<String, TraversalWeight>;

/// Coefficients of the authority combination `A = α·B + β·T + γ·R`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RlcfWeights {
    /// α, applied to the baseline credential score.
    pub baseline_credentials: LearnableWeight,
    /// β, applied to the track record score.
    pub track_record: LearnableWeight,
    /// γ, applied to recent performance.
    pub recent_performance: LearnableWeight,
    /// λ in the track record smoothing `T = (1-λ)·T + λ·q`.
    pub track_record_update_factor: f64,
}

impl RlcfWeights {
    /// Sum of the current α, β and γ.
    pub fn coefficient_sum(&self) -> f64 {
        self.baseline_credentials.current()
            + self.track_record.current()
            + self.recent_performance.current()
    }

    /// Largest authority the combination can produce given the bounds.
    pub fn authority_ceiling(&self) -> f64 {
        self.baseline_credentials.upper() + self.track_record.upper() + self.recent_performance.upper()
    }
}

/// Expert routing priors and query-type modifiers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GatingWeights {
    /// Prior probability mass per expert.
    pub expert_priors: BTreeMap<String, LearnableWeight>,
    /// Multipliers per query type, per expert.
    #[serde(default)]
    pub query_type_modifiers: BTreeMap<String, BTreeMap<String, f64>>,
}

/// The versioned weight document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Document version label.
    pub version: String,
    /// Retrieval balance.
    pub retrieval: RetrievalWeights,
    /// Per-expert relation weights.
    #[serde(default)]
    pub expert_traversal: BTreeMap<String, ExpertTraversal>,
    /// Authority combination coefficients.
    pub rlcf: RlcfWeights,
    /// Expert gating.
    #[serde(default)]
    pub gating: GatingWeights,
}

impl WeightConfig {
    /// Parses and validates a JSON weight document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: WeightConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the document as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates every learnable weight and the scalar parameters.
    ///
    /// Weight names in errors are dotted paths such as
    /// `expert_traversal.literal.defines`.
    pub fn validate(&self) -> Result<()> {
        self.retrieval.alpha.validate("retrieval.alpha")?;
        if self.retrieval.over_retrieve_factor == 0 {
            return Err(WeightError::InvalidDocument(
                "retrieval.over_retrieve_factor must be at least 1".to_string(),
            ));
        }

        for (expert, relations) in &self.expert_traversal {
            for (relation, weight) in relations {
                match weight {
                    TraversalWeight::Learnable(w) => {
                        w.validate(&format!("expert_traversal.{}.{}", expert, relation))?
                    }
                    TraversalWeight::Fixed(v) if !v.is_finite() => {
                        return Err(WeightError::InvalidWeight {
                            name: format!("expert_traversal.{}.{}", expert, relation),
                            reason: "fixed weight must be finite".to_string(),
                        })
                    }
                    TraversalWeight::Fixed(_) => {}
                }
            }
        }

        self.rlcf.baseline_credentials.validate("rlcf.baseline_credentials")?;
        self.rlcf.track_record.validate("rlcf.track_record")?;
        self.rlcf.recent_performance.validate("rlcf.recent_performance")?;
        let lambda = self.rlcf.track_record_update_factor;
        if !(lambda > 0.0 && lambda <= 1.0) {
            return Err(WeightError::InvalidWeight {
                name: "rlcf.track_record_update_factor".to_string(),
                reason: format!("{} must lie in (0, 1]", lambda),
            });
        }

        for (expert, prior) in &self.gating.expert_priors {
            prior.validate(&format!("gating.expert_priors.{}", expert))?;
        }
        Ok(())
    }

    /// Rejects the document when α+β+γ deviates from 1.0 by more than `tolerance`.
    pub fn check_authority_weight_sum(&self, tolerance: f64) -> Result<()> {
        let sum = self.rlcf.coefficient_sum();
        if (sum - 1.0).abs() > tolerance {
            return Err(WeightError::InvalidDocument(format!(
                "authority coefficients sum to {:.4}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }

    /// Extracts one category of the document.
    pub fn category(&self, category: WeightCategory) -> CategoryWeights {
        match category {
            WeightCategory::Retrieval => CategoryWeights::Retrieval(self.retrieval.clone()),
            WeightCategory::ExpertTraversal => {
                CategoryWeights::ExpertTraversal(self.expert_traversal.clone())
            }
            WeightCategory::Rlcf => CategoryWeights::Rlcf(self.rlcf.clone()),
            WeightCategory::Gating => CategoryWeights::Gating(self.gating.clone()),
        }
    }
}

impl Default for WeightConfig {
    /// The static default document.
    fn default() -> Self {
        fn w(default: f64, lower: f64, upper: f64, learning_rate: f64) -> LearnableWeight {
            LearnableWeight {
                default,
                bounds: [lower, upper],
                learnable: true,
                learning_rate,
                value: None,
            }
        }
        fn fixed(value: f64) -> TraversalWeight {
            TraversalWeight::Fixed(value)
        }
        fn learn(default: f64, lower: f64, upper: f64) -> TraversalWeight {
            TraversalWeight::Learnable(w(default, lower, upper, 0.02))
        }
        fn table(entries: Vec<(&str, TraversalWeight)>) -> ExpertTraversal {
            entries
                .into_iter()
                .map(|(relation, weight)| (relation.to_string(), weight))
                .collect()
        }

        let mut expert_traversal = BTreeMap::new();
        expert_traversal.insert(
            "literal".to_string(),
            table(vec![
                ("contains", fixed(1.0)),
                ("defines", learn(0.9, 0.6, 1.0)),
                ("disciplines", learn(0.95, 0.6, 1.0)),
                ("references", fixed(0.6)),
            ]),
        );
        expert_traversal.insert(
            "systemic".to_string(),
            table(vec![
                ("modifies", learn(0.85, 0.5, 1.0)),
                ("part_of", fixed(0.8)),
                ("references", learn(0.9, 0.5, 1.0)),
            ]),
        );
        expert_traversal.insert(
            "principles".to_string(),
            table(vec![
                ("balances", fixed(0.85)),
                ("derives_from", fixed(0.8)),
                ("implements", learn(0.95, 0.6, 1.0)),
            ]),
        );
        expert_traversal.insert(
            "precedent".to_string(),
            table(vec![
                ("applies", fixed(0.9)),
                ("cites", fixed(0.7)),
                ("interprets", learn(0.95, 0.6, 1.0)),
                ("overrules", learn(0.85, 0.5, 1.0)),
            ]),
        );

        let expert_priors = [
            ("literal", 0.3),
            ("precedent", 0.25),
            ("principles", 0.2),
            ("systemic", 0.25),
        ]
        .into_iter()
        .map(|(expert, prior)| (expert.to_string(), w(prior, 0.05, 0.6, 0.01)))
        .collect();

        let mut query_type_modifiers = BTreeMap::new();
        query_type_modifiers.insert(
            "definition".to_string(),
            BTreeMap::from([("literal".to_string(), 1.3), ("systemic".to_string(), 0.9)]),
        );
        query_type_modifiers.insert(
            "interpretation".to_string(),
            BTreeMap::from([("precedent".to_string(), 1.2), ("principles".to_string(), 1.2)]),
        );
        query_type_modifiers.insert(
            "case_law".to_string(),
            BTreeMap::from([("literal".to_string(), 0.8), ("precedent".to_string(), 1.5)]),
        );

        Self {
            version: "1.0.0".to_string(),
            retrieval: RetrievalWeights {
                alpha: w(0.7, 0.3, 0.9, 0.01),
                over_retrieve_factor: 3,
                max_graph_hops: 3,
            },
            expert_traversal,
            rlcf: RlcfWeights {
                baseline_credentials: w(0.4, 0.2, 0.6, 0.005),
                track_record: w(0.4, 0.2, 0.6, 0.005),
                recent_performance: w(0.2, 0.1, 0.4, 0.005),
                track_record_update_factor: 0.05,
            },
            gating: GatingWeights {
                expert_priors,
                query_type_modifiers,
            },
        }
    }
}

/// Independently addressable categories of the weight document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightCategory {
    /// `retrieval`
    Retrieval,
    /// `expert_traversal`
    ExpertTraversal,
    /// `rlcf`
    Rlcf,
    /// `gating`
    Gating,
}

impl WeightCategory {
    /// All categories in document order.
    pub const ALL: [WeightCategory; 4] = [
        WeightCategory::Retrieval,
        WeightCategory::ExpertTraversal,
        WeightCategory::Rlcf,
        WeightCategory::Gating,
    ];

    /// Document key of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightCategory::Retrieval => "retrieval",
            WeightCategory::ExpertTraversal => "expert_traversal",
            WeightCategory::Rlcf => "rlcf",
            WeightCategory::Gating => "gating",
        }
    }
}

impl fmt::Display for WeightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeightCategory {
    type Err = WeightError;

    fn from_str(s: &str) -> Result<Self> {
        WeightCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| WeightError::UnknownCategory(s.to_string()))
    }
}

/// One category of a resolved weight document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CategoryWeights {
    /// Retrieval section.
    Retrieval(RetrievalWeights),
    /// Expert traversal tables.
    ExpertTraversal(BTreeMap<String, ExpertTraversal>),
    /// Authority combination coefficients.
    Rlcf(RlcfWeights),
    /// Gating priors and modifiers.
    Gating(GatingWeights),
}

/// Errors that can occur in weight storage and validation.
#[derive(Debug, Error)]
pub enum WeightError {
    /// Failed to open or use the database.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Failed to serialize or deserialize a document.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A weight violates its invariants.
    #[error("Invalid weight '{name}': {reason}")]
    InvalidWeight {
        /// Dotted path of the weight.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The document as a whole is invalid.
    #[error("Invalid weight document: {0}")]
    InvalidDocument(String),

    /// The experiment id cannot name a storage scope.
    #[error("Invalid scope id {0:?}: ids must not contain NUL")]
    InvalidScope(String),

    /// The category name is not part of the document.
    #[error("Unknown weight category: {0}")]
    UnknownCategory(String),

    /// A stored record could not be decoded.
    #[error("Corrupted weight record: {0}")]
    Corrupted(String),

    /// A lock guarding shared state was poisoned by a panicking writer.
    #[error("Weight store lock poisoned")]
    LockPoisoned,
}

/// Result type for weight operations.
pub type Result<T> = std::result::Result<T, WeightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_document_is_valid() {
        let config = WeightConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.check_authority_weight_sum(1e-9).is_ok());
    }

    #[test]
    fn test_learnable_weight_rejects_default_on_bound() {
        assert!(LearnableWeight::new(0.3, 0.3, 0.9).is_err());
        assert!(LearnableWeight::new(0.9, 0.3, 0.9).is_err());
        assert!(LearnableWeight::new(0.5, 0.9, 0.3).is_err());
        assert!(LearnableWeight::new(f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_set_value_clamps() {
        let mut weight = LearnableWeight::new(0.5, 0.2, 0.8).unwrap();
        assert_eq!(weight.set_value(-3.0), 0.2);
        assert_eq!(weight.set_value(0.6), 0.6);
        assert_eq!(weight.set_value(f64::NAN), 0.2);
        weight.reset();
        assert_eq!(weight.current(), 0.5);
    }

    #[test]
    fn test_document_serializes_with_contract_keys() {
        let json = serde_json::to_value(WeightConfig::default()).unwrap();
        for key in ["version", "retrieval", "expert_traversal", "rlcf", "gating"] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
        let alpha = &json["retrieval"]["alpha"];
        assert_eq!(alpha["bounds"], serde_json::json!([0.3, 0.9]));
        assert!(alpha.get("value").is_none());
        assert_eq!(json["expert_traversal"]["literal"]["contains"], serde_json::json!(1.0));
        assert!(json["expert_traversal"]["literal"]["defines"].is_object());
    }

    #[test]
    fn test_document_round_trips_through_json() {
        let config = WeightConfig::default();
        let parsed = WeightConfig::from_json_str(&config.to_json_pretty().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_names_offending_weight() {
        let mut config = WeightConfig::default();
        config.rlcf.track_record.bounds = [0.5, 0.3];
        match config.validate() {
            Err(WeightError::InvalidWeight { name, .. }) => assert_eq!(name, "rlcf.track_record"),
            other => panic!("expected InvalidWeight, got {:?}", other),
        }
    }

    #[test]
    fn test_authority_sum_check() {
        let mut config = WeightConfig::default();
        config.rlcf.recent_performance.set_value(0.4);
        assert!(config.check_authority_weight_sum(0.01).is_err());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_category_round_trip() {
        for category in WeightCategory::ALL {
            assert_eq!(category.as_str().parse::<WeightCategory>().unwrap(), category);
        }
        assert!("bogus".parse::<WeightCategory>().is_err());
    }

    #[test]
    fn test_traversal_weight_untagged() {
        let fixed: TraversalWeight = serde_json::from_str("0.7").unwrap();
        assert_eq!(fixed, TraversalWeight::Fixed(0.7));
        let learnable: TraversalWeight =
            serde_json::from_str(r#"{"default":0.5,"bounds":[0.1,0.9],"learning_rate":0.01}"#)
                .unwrap();
        assert!(matches!(learnable, TraversalWeight::Learnable(_)));
        assert_eq!(learnable.current(), 0.5);
    }
}
