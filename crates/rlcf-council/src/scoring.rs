//! Consistency and correctness scoring of individual feedback entries.
//!
//! Both scores compare an entry's fields with a reference (the consensus, or
//! the task's ground truth) and average the per-field similarities:
//!
//! | Field kind | Similarity |
//! |------------|------------|
//! | Categorical | 1.0 on case-insensitive match, else 0.0 |
//! | Set | Jaccard overlap of the canonical items |
//! | Text | 1.0 on normalized match, else weighted token Jaccard plus a vocabulary bonus |
//!
//! For text, tokens in the domain vocabulary weigh `vocabulary_weight`
//! instead of 1, and `vocabulary_bonus` times the Jaccard overlap restricted
//! to vocabulary tokens is added before clamping to [0, 1].
//!
//! Both functions are total: empty or mismatched input scores 0.0.

use crate::consensus::ConsensusResult;
use crate::models::{FeedbackPayload, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Configuration for the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Domain vocabulary (lowercase tokens).
    pub vocabulary: BTreeSet<String>,
    /// Weight of a vocabulary token in the token Jaccard.
    pub vocabulary_weight: f64,
    /// Multiplier of the vocabulary-restricted Jaccard bonus.
    pub vocabulary_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            vocabulary: legal_vocabulary(),
            vocabulary_weight: 2.0,
            vocabulary_bonus: 0.2,
        }
    }
}

impl ScoringConfig {
    /// Replaces the vocabulary.
    #[must_use]
    pub fn with_vocabulary<I, S>(mut self, vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vocabulary = vocabulary
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// Sets the vocabulary token weight.
    #[must_use]
    pub fn with_vocabulary_weight(mut self, weight: f64) -> Self {
        self.vocabulary_weight = weight;
        self
    }

    /// Sets the vocabulary bonus multiplier.
    #[must_use]
    pub fn with_vocabulary_bonus(mut self, bonus: f64) -> Self {
        self.vocabulary_bonus = bonus;
        self
    }
}

/// Default legal-domain vocabulary.
pub fn legal_vocabulary() -> BTreeSet<String> {
    [
        "appeal", "article", "breach", "clause", "code", "contract", "court", "damages",
        "defendant", "jurisdiction", "liability", "negligence", "obligation", "plaintiff",
        "precedent", "regulation", "statute", "tort", "unlawful", "void",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Jaccard overlap of two sets; 0.0 when both are empty.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Scores feedback entries against consensus and ground truth.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyCorrectnessScorer {
    config: ScoringConfig,
}

impl ConsistencyCorrectnessScorer {
    /// Creates a scorer.
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Agreement of a payload with the consensus, in [0, 1].
    ///
    /// Averaged over the consensus fields; a consensus field the payload
    /// lacks scores 0.
    pub fn consistency(&self, payload: &FeedbackPayload, consensus: &ConsensusResult) -> f64 {
        if payload.task_type() != consensus.task_type || consensus.fields.is_empty() {
            return 0.0;
        }
        let reference: BTreeMap<&str, &FieldValue> = consensus
            .fields
            .iter()
            .map(|(name, field)| (name.as_str(), &field.value))
            .collect();
        self.mean_similarity(payload, &reference)
    }

    /// Agreement of a payload with ground truth, in [0, 1].
    ///
    /// 0.0 when there is no ground truth or it belongs to another task type.
    pub fn correctness(&self, payload: &FeedbackPayload, ground_truth: Option<&FeedbackPayload>) -> f64 {
        let Some(truth) = ground_truth else {
            return 0.0;
        };
        if truth.task_type() != payload.task_type() {
            return 0.0;
        }
        let truth_fields = truth.fields();
        let reference: BTreeMap<&str, &FieldValue> =
            truth_fields.iter().map(|(name, value)| (*name, value)).collect();
        self.mean_similarity(payload, &reference)
    }

    /// Similarity of two field values, in [0, 1].
    pub fn similarity(&self, a: &FieldValue, b: &FieldValue) -> f64 {
        let score = match (a.canonical(), b.canonical()) {
            (FieldValue::Categorical(x), FieldValue::Categorical(y)) => {
                if !x.is_empty() && x == y {
                    1.0
                } else {
                    0.0
                }
            }
            (FieldValue::Set(x), FieldValue::Set(y)) => jaccard(&x, &y),
            (FieldValue::Text(x), FieldValue::Text(y)) => self.text_similarity(&x, &y),
            _ => 0.0,
        };
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn mean_similarity(&self, payload: &FeedbackPayload, reference: &BTreeMap<&str, &FieldValue>) -> f64 {
        if reference.is_empty() {
            return 0.0;
        }
        let own: BTreeMap<&str, FieldValue> = payload.fields().into_iter().collect();
        let total: f64 = reference
            .iter()
            .map(|(name, expected)| {
                own.get(name)
                    .map_or(0.0, |value| self.similarity(value, expected))
            })
            .sum();
        total / reference.len() as f64
    }

    fn text_similarity(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }

        let (ta, tb) = (tokenize(a), tokenize(b));
        let weight = |token: &String| {
            if self.config.vocabulary.contains(token) {
                self.config.vocabulary_weight
            } else {
                1.0
            }
        };
        let union: f64 = ta.union(&tb).map(weight).sum();
        if union <= 0.0 {
            return 0.0;
        }
        let intersection: f64 = ta.intersection(&tb).map(weight).sum();
        let weighted = intersection / union;

        let va: BTreeSet<&String> = ta.iter().filter(|t| self.config.vocabulary.contains(*t)).collect();
        let vb: BTreeSet<&String> = tb.iter().filter(|t| self.config.vocabulary.contains(*t)).collect();
        let bonus = self.config.vocabulary_bonus * jaccard(&va, &vb);

        (weighted + bonus).clamp(0.0, 1.0)
    }
}
