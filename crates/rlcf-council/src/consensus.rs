//! Authority-weighted consensus over feedback entries.
//!
//! One [`AggregationStrategy`] per task type, dispatched by the
//! [`ConsensusAggregator`]. Every strategy follows the same per-field
//! algorithm:
//!
//! 1. Bucket each entry's field value. Categorical and text values join a
//!    bucket on normalized equality; sets join the first bucket whose
//!    representative has Jaccard overlap ≥ `set_match_threshold`.
//! 2. Add the evaluator's authority, times the strategy's weight modifier,
//!    to the bucket.
//! 3. The heaviest bucket wins; `confidence = winning / total`.
//! 4. Up to `max_alternatives` runner-up buckets are kept with their support.
//!
//! ## Tie-Break
//!
//! Buckets of exactly equal weight resolve to the bucket first seen in
//! submission order. Alternatives with equal weight keep submission order.
//!
//! ## Weight Modifiers
//!
//! | Task type | Modifier |
//! |-----------|----------|
//! | `qa` | position: agree 1.0, partially 0.75, disagree 0.5 |
//! | `statutory_rule_qa` | confidence level × position |
//! | `classification` | none |
//! | `prediction` | self-reported confidence |
//! | `nli` | self-reported confidence |
//! | `ner` | none |

use crate::error::CouncilError;
use crate::models::{FeedbackEntry, FeedbackPayload, FieldValue, TaskType};
use crate::scoring::jaccard;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Configuration for consensus aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Minimum Jaccard overlap for a set to join an existing bucket.
    pub set_match_threshold: f64,
    /// Maximum number of runner-up buckets retained per field.
    pub max_alternatives: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            set_match_threshold: 0.75,
            max_alternatives: 3,
        }
    }
}

impl AggregationConfig {
    /// Sets the set-bucketing threshold.
    #[must_use]
    pub fn with_set_match_threshold(mut self, threshold: f64) -> Self {
        self.set_match_threshold = threshold;
        self
    }

    /// Sets the number of retained alternatives.
    #[must_use]
    pub fn with_max_alternatives(mut self, max: usize) -> Self {
        self.max_alternatives = max;
        self
    }
}

/// A payload paired with its evaluator's current authority.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedFeedback {
    /// Submitting evaluator.
    pub evaluator_id: String,
    /// Typed payload.
    pub payload: FeedbackPayload,
    /// Authority of the evaluator at aggregation time.
    pub authority: f64,
}

impl WeightedFeedback {
    /// Creates a weighted payload.
    pub fn new(evaluator_id: impl Into<String>, payload: FeedbackPayload, authority: f64) -> Self {
        Self {
            evaluator_id: evaluator_id.into(),
            payload,
            authority,
        }
    }

    /// Weights a stored feedback entry.
    pub fn from_entry(entry: &FeedbackEntry, authority: f64) -> Self {
        Self::new(entry.evaluator_id.clone(), entry.payload.clone(), authority)
    }
}

/// A runner-up value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alternative {
    /// Representative value of the bucket.
    pub value: FieldValue,
    /// Accumulated weight.
    pub weight: f64,
    /// Share of the total weight.
    pub support: f64,
}

/// Consensus on one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConsensus {
    /// Winning value (representative of the winning bucket).
    pub value: FieldValue,
    /// `winning_weight / total_weight`.
    pub confidence: f64,
    /// Weight of the winning bucket.
    pub support_weight: f64,
    /// Runner-ups, heaviest first.
    pub alternatives: Vec<Alternative>,
}

/// Consensus over all fields of a task's feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    /// Task type aggregated.
    pub task_type: TaskType,
    /// Consensus per field.
    pub fields: BTreeMap<String, FieldConsensus>,
    /// Field whose confidence is reported as the overall confidence.
    pub primary_field: String,
    /// Confidence of the primary field.
    pub confidence: f64,
    /// Number of feedback entries aggregated.
    pub participant_count: usize,
    /// Sum of modified authority weights.
    pub total_weight: f64,
}

impl ConsensusResult {
    /// Consensus value of the primary field.
    pub fn primary_value(&self) -> Option<&FieldValue> {
        self.fields.get(&self.primary_field).map(|f| &f.value)
    }
}

struct Bucket {
    representative: FieldValue,
    canonical: FieldValue,
    weight: f64,
}

/// Weighted buckets for one field, in first-seen order.
#[derive(Default)]
struct Tally {
    buckets: Vec<Bucket>,
    total: f64,
}

impl Tally {
    fn add(&mut self, value: FieldValue, weight: f64, set_match_threshold: f64) {
        let canonical = value.canonical();
        let existing = self.buckets.iter_mut().find(|bucket| {
            match (&bucket.canonical, &canonical) {
                (FieldValue::Set(a), FieldValue::Set(b)) => {
                    a == b || jaccard(a, b) >= set_match_threshold
                }
                (a, b) => a == b,
            }
        });
        match existing {
            Some(bucket) => bucket.weight += weight,
            None => self.buckets.push(Bucket {
                representative: value,
                canonical,
                weight,
            }),
        }
        self.total += weight;
    }

    fn resolve(self, max_alternatives: usize) -> Option<FieldConsensus> {
        let share = |weight: f64| {
            if self.total > 0.0 {
                weight / self.total
            } else {
                0.0
            }
        };

        // Strict comparison keeps the first-seen bucket on ties.
        let mut winner = 0;
        for (index, bucket) in self.buckets.iter().enumerate() {
            if bucket.weight > self.buckets.get(winner)?.weight {
                winner = index;
            }
        }

        let mut rest: Vec<&Bucket> = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != winner)
            .map(|(_, bucket)| bucket)
            .collect();
        rest.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let alternatives = rest
            .into_iter()
            .take(max_alternatives)
            .map(|bucket| Alternative {
                value: bucket.representative.clone(),
                weight: bucket.weight,
                support: share(bucket.weight),
            })
            .collect();

        let winning = self.buckets.get(winner)?;
        Some(FieldConsensus {
            value: winning.representative.clone(),
            confidence: share(winning.weight),
            support_weight: winning.weight,
            alternatives,
        })
    }
}

/// Aggregation behaviour for one task type.
pub trait AggregationStrategy: Send + Sync {
    /// Task type handled.
    fn task_type(&self) -> TaskType;

    /// Field whose confidence is the overall confidence.
    fn primary_field(&self) -> &'static str {
        FeedbackPayload::primary_field(self.task_type())
    }

    /// Multiplier applied to the evaluator's authority for this payload.
    fn weight_modifier(&self, _payload: &FeedbackPayload) -> f64 {
        1.0
    }

    /// Aggregates feedback for one task.
    ///
    /// # Errors
    ///
    /// `CouncilError::NoFeedback` for an empty slice and
    /// `CouncilError::MixedTaskTypes` if a payload belongs to another type.
    fn aggregate(
        &self,
        feedback: &[WeightedFeedback],
        config: &AggregationConfig,
    ) -> Result<ConsensusResult> {
        let task_type = self.task_type();
        if feedback.is_empty() {
            return Err(CouncilError::NoFeedback(task_type));
        }

        let mut tallies: BTreeMap<&'static str, Tally> = BTreeMap::new();
        let mut total_weight = 0.0;
        for item in feedback {
            let found = item.payload.task_type();
            if found != task_type {
                return Err(CouncilError::MixedTaskTypes {
                    expected: task_type,
                    found,
                });
            }
            let weight = sanitize(item.authority) * sanitize(self.weight_modifier(&item.payload));
            total_weight += weight;
            for (name, value) in item.payload.fields() {
                tallies
                    .entry(name)
                    .or_default()
                    .add(value, weight, config.set_match_threshold);
            }
        }

        let fields: BTreeMap<String, FieldConsensus> = tallies
            .into_iter()
            .filter_map(|(name, tally)| {
                tally
                    .resolve(config.max_alternatives)
                    .map(|consensus| (name.to_string(), consensus))
            })
            .collect();

        let primary_field = self.primary_field().to_string();
        let confidence = fields.get(&primary_field).map_or(0.0, |f| f.confidence);
        debug!(
            "Aggregated {} {} entries: confidence {:.3}",
            feedback.len(),
            task_type,
            confidence
        );

        Ok(ConsensusResult {
            task_type,
            fields,
            primary_field,
            confidence,
            participant_count: feedback.len(),
            total_weight,
        })
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.max(0.0)
    } else {
        0.0
    }
}

/// Question answering: weight by position.
#[derive(Debug, Clone, Copy, Default)]
pub struct QaStrategy;

impl AggregationStrategy for QaStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Qa
    }

    fn weight_modifier(&self, payload: &FeedbackPayload) -> f64 {
        match payload {
            FeedbackPayload::Qa { position, .. } => position.modifier(),
            _ => 1.0,
        }
    }
}

/// Statutory rule QA: weight by confidence level and position.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatutoryRuleQaStrategy;

impl AggregationStrategy for StatutoryRuleQaStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::StatutoryRuleQa
    }

    fn weight_modifier(&self, payload: &FeedbackPayload) -> f64 {
        match payload {
            FeedbackPayload::StatutoryRuleQa {
                position,
                confidence,
                ..
            } => confidence.factor() * position.modifier(),
            _ => 1.0,
        }
    }
}

/// Classification: plain authority weighting of label sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassificationStrategy;

impl AggregationStrategy for ClassificationStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Classification
    }
}

/// Prediction: weight by self-reported confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictionStrategy;

impl AggregationStrategy for PredictionStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Prediction
    }

    fn weight_modifier(&self, payload: &FeedbackPayload) -> f64 {
        match payload {
            FeedbackPayload::Prediction { confidence, .. } => confidence.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }
}

/// NLI: weight by self-reported confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NliStrategy;

impl AggregationStrategy for NliStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Nli
    }

    fn weight_modifier(&self, payload: &FeedbackPayload) -> f64 {
        match payload {
            FeedbackPayload::Nli { confidence, .. } => confidence.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }
}

/// NER: plain authority weighting of span sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NerStrategy;

impl AggregationStrategy for NerStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Ner
    }
}

/// Dispatches aggregation to the strategy registered for a task type.
///
/// # Example
///
/// ```rust
/// use rlcf_council::{AggregationConfig, ConsensusAggregator, FeedbackPayload, TaskType, WeightedFeedback};
///
/// let aggregator = ConsensusAggregator::new(AggregationConfig::default());
/// let vote = |outcome: &str| FeedbackPayload::Prediction { outcome: outcome.to_string(), confidence: 1.0 };
/// let feedback = vec![
///     WeightedFeedback::new("e1", vote("A"), 0.9),
///     WeightedFeedback::new("e2", vote("B"), 0.6),
///     WeightedFeedback::new("e3", vote("A"), 0.5),
/// ];
///
/// let consensus = aggregator.aggregate(TaskType::Prediction, &feedback).unwrap();
/// assert!((consensus.confidence - 0.7).abs() < 1e-9);
/// assert!(aggregator.aggregate(TaskType::Prediction, &[]).is_err());
/// ```
pub struct ConsensusAggregator {
    strategies: BTreeMap<TaskType, Box<dyn AggregationStrategy>>,
    config: AggregationConfig,
}

impl Default for ConsensusAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}

impl ConsensusAggregator {
    /// Creates an aggregator with a strategy for every task type.
    pub fn new(config: AggregationConfig) -> Self {
        let strategies: Vec<Box<dyn AggregationStrategy>> = vec![
            Box::new(QaStrategy),
            Box::new(StatutoryRuleQaStrategy),
            Box::new(ClassificationStrategy),
            Box::new(PredictionStrategy),
            Box::new(NliStrategy),
            Box::new(NerStrategy),
        ];
        Self {
            strategies: strategies.into_iter().map(|s| (s.task_type(), s)).collect(),
            config,
        }
    }

    /// Replaces the strategy for its task type.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn AggregationStrategy>) -> Self {
        self.strategies.insert(strategy.task_type(), strategy);
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregates feedback for a task of the given type.
    pub fn aggregate(
        &self,
        task_type: TaskType,
        feedback: &[WeightedFeedback],
    ) -> Result<ConsensusResult> {
        if feedback.is_empty() {
            return Err(CouncilError::NoFeedback(task_type));
        }
        let strategy = self.strategies.get(&task_type).ok_or_else(|| {
            CouncilError::Internal(format!("no aggregation strategy for {}", task_type))
        })?;
        strategy.aggregate(feedback, &self.config)
    }
}

impl std::fmt::Debug for ConsensusAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusAggregator")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceLevel, EntitySpan, NliLabel, Position};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn prediction(outcome: &str) -> FeedbackPayload {
        FeedbackPayload::Prediction {
            outcome: outcome.to_string(),
            confidence: 1.0,
        }
    }

    fn labels(items: &[&str]) -> FeedbackPayload {
        FeedbackPayload::Classification {
            labels: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn aggregator() -> ConsensusAggregator {
        ConsensusAggregator::default()
    }

    #[test]
    fn test_weighted_majority_scenario() {
        let feedback = vec![
            WeightedFeedback::new("e1", prediction("A"), 0.9),
            WeightedFeedback::new("e2", prediction("B"), 0.6),
            WeightedFeedback::new("e3", prediction("A"), 0.5),
        ];
        let consensus = aggregator().aggregate(TaskType::Prediction, &feedback).unwrap();

        assert_eq!(
            consensus.primary_value(),
            Some(&FieldValue::Categorical("A".to_string()))
        );
        assert!((consensus.confidence - 0.7).abs() < 1e-9);
        let outcome = &consensus.fields["outcome"];
        assert_eq!(outcome.alternatives.len(), 1);
        assert!((outcome.alternatives[0].support - 0.3).abs() < 1e-9);
        assert_eq!(consensus.participant_count, 3);
    }

    #[test]
    fn test_empty_feedback_is_explicit_error_for_every_type() {
        let aggregator = aggregator();
        for task_type in TaskType::ALL {
            match aggregator.aggregate(task_type, &[]) {
                Err(CouncilError::NoFeedback(t)) => assert_eq!(t, task_type),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn test_mixed_task_types_rejected() {
        let feedback = vec![
            WeightedFeedback::new("e1", prediction("A"), 0.9),
            WeightedFeedback::new("e2", labels(&["x"]), 0.6),
        ];
        assert!(matches!(
            aggregator().aggregate(TaskType::Prediction, &feedback),
            Err(CouncilError::MixedTaskTypes { .. })
        ));
    }

    #[test]
    fn test_tie_resolves_to_first_seen() {
        let feedback = vec![
            WeightedFeedback::new("e1", prediction("B"), 0.5),
            WeightedFeedback::new("e2", prediction("A"), 0.5),
        ];
        let consensus = aggregator().aggregate(TaskType::Prediction, &feedback).unwrap();
        assert_eq!(
            consensus.primary_value(),
            Some(&FieldValue::Categorical("B".to_string()))
        );
        assert_eq!(consensus.confidence, 0.5);
    }

    #[test]
    fn test_categorical_buckets_ignore_case() {
        let feedback = vec![
            WeightedFeedback::new("e1", prediction("Upheld "), 0.4),
            WeightedFeedback::new("e2", prediction("upheld"), 0.4),
            WeightedFeedback::new("e3", prediction("Reversed"), 0.7),
        ];
        let consensus = aggregator().aggregate(TaskType::Prediction, &feedback).unwrap();
        assert_eq!(
            consensus.primary_value(),
            Some(&FieldValue::Categorical("Upheld".to_string()))
        );
    }

    #[test]
    fn test_qa_position_modifier() {
        let qa = |position| FeedbackPayload::Qa {
            position,
            validated_answer: "x".to_string(),
        };
        // agree: 0.6 * 1.0 = 0.6; disagree: 1.0 * 0.5 = 0.5
        let feedback = vec![
            WeightedFeedback::new("e1", qa(Position::Disagree), 1.0),
            WeightedFeedback::new("e2", qa(Position::Agree), 0.6),
        ];
        let consensus = aggregator().aggregate(TaskType::Qa, &feedback).unwrap();
        assert_eq!(
            consensus.primary_value(),
            Some(&FieldValue::Categorical("agree".to_string()))
        );
        assert!((consensus.total_weight - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_statutory_confidence_modifier() {
        let rule_qa = |position, confidence| FeedbackPayload::StatutoryRuleQa {
            position,
            validated_answer: "x".to_string(),
            cited_rules: BTreeSet::from(["art. 1218".to_string()]),
            confidence,
        };
        // agree/low: 0.9 * 0.5 * 1.0 = 0.45; disagree/high: 1.0 * 1.0 * 0.5 = 0.5
        let feedback = vec![
            WeightedFeedback::new("e1", rule_qa(Position::Agree, ConfidenceLevel::Low), 0.9),
            WeightedFeedback::new("e2", rule_qa(Position::Disagree, ConfidenceLevel::High), 1.0),
        ];
        let consensus = aggregator()
            .aggregate(TaskType::StatutoryRuleQa, &feedback)
            .unwrap();
        assert_eq!(
            consensus.primary_value(),
            Some(&FieldValue::Categorical("disagree".to_string()))
        );
        assert_eq!(consensus.fields["cited_rules"].confidence, 1.0);
    }

    #[test]
    fn test_set_bucketing_by_jaccard() {
        let feedback = vec![
            WeightedFeedback::new("e1", labels(&["a", "b", "c", "d"]), 0.5),
            WeightedFeedback::new("e2", labels(&["a", "b", "c"]), 0.3),
            WeightedFeedback::new("e3", labels(&["x"]), 0.6),
        ];
        let consensus = aggregator()
            .aggregate(TaskType::Classification, &feedback)
            .unwrap();
        let field = &consensus.fields["labels"];
        // {a,b,c} overlaps {a,b,c,d} at 0.75 and joins its bucket: 0.8 vs 0.6
        assert!((field.support_weight - 0.8).abs() < 1e-9);
        assert_eq!(field.alternatives.len(), 1);
        match &field.value {
            FieldValue::Set(items) => assert_eq!(items.len(), 4),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_ner_spans_and_alternative_limit() {
        let ner = |label: &str| FeedbackPayload::Ner {
            entities: BTreeSet::from([EntitySpan {
                start: 0,
                end: 4,
                label: label.to_string(),
            }]),
        };
        let feedback: Vec<_> = ["PER", "ORG", "LOC", "MISC", "DATE"]
            .iter()
            .enumerate()
            .map(|(i, label)| WeightedFeedback::new(format!("e{}", i), ner(label), 0.5 - i as f64 * 0.05))
            .collect();
        let consensus = aggregator().aggregate(TaskType::Ner, &feedback).unwrap();
        let field = &consensus.fields["entities"];
        assert_eq!(field.alternatives.len(), 3);
        assert!(field
            .alternatives
            .windows(2)
            .all(|w| w[0].weight >= w[1].weight));
    }

    #[test]
    fn test_nli_zero_authority() {
        let nli = FeedbackPayload::Nli {
            label: NliLabel::Entailment,
            confidence: 0.8,
        };
        let consensus = aggregator()
            .aggregate(TaskType::Nli, &[WeightedFeedback::new("e1", nli, 0.0)])
            .unwrap();
        assert_eq!(consensus.confidence, 0.0);
        assert_eq!(
            consensus.primary_value(),
            Some(&FieldValue::Categorical("entailment".to_string()))
        );
    }

    proptest! {
        /// Property: aggregation is deterministic for fixed input.
        #[test]
        fn prop_aggregate_is_deterministic(
            votes in proptest::collection::vec((0usize..4, 0.0f64..1.0), 1..30)
        ) {
            let outcomes = ["A", "B", "C", "D"];
            let feedback: Vec<_> = votes
                .iter()
                .enumerate()
                .map(|(i, (o, a))| WeightedFeedback::new(format!("e{}", i), prediction(outcomes[*o]), *a))
                .collect();
            let aggregator = aggregator();
            let first = aggregator.aggregate(TaskType::Prediction, &feedback).unwrap();
            let second = aggregator.aggregate(TaskType::Prediction, &feedback).unwrap();
            prop_assert_eq!(
                serde_json::to_string(&first).unwrap(),
                serde_json::to_string(&second).unwrap()
            );
            prop_assert!(first.confidence >= 0.0 && first.confidence <= 1.0 + 1e-12);
        }
    }
}
