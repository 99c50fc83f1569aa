//! Domain models for evaluators, tasks and feedback.
//!
//! Feedback payloads are a tagged variant with one case per task type. Each
//! case declares its own fields; [`FeedbackPayload::fields`] exposes them to
//! the aggregation and scoring machinery as typed [`FieldValue`]s so neither
//! has to branch on a string tag.
//!
//! ## Task Lifecycle
//!
//! ```text
//! Open ──▶ BlindEvaluation ──▶ Aggregated ──▶ Closed
//! ```
//!
//! Feedback is accepted only while a task is in `BlindEvaluation`.

use crate::error::CouncilError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Evaluators
// =============================================================================

/// Credential kind carrying the evaluator's professional field.
pub const PROFESSIONAL_FIELD: &str = "professional_field";

/// Credential kind carrying years of professional experience.
pub const PROFESSIONAL_EXPERIENCE: &str = "professional_experience";

/// Credential kind carrying the evaluator's location.
pub const LOCATION: &str = "location";

/// A credential value: numeric or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialValue {
    /// Numeric value such as years or publication count.
    Number(f64),
    /// Textual value such as a degree or role.
    Text(String),
}

impl CredentialValue {
    /// Numeric reading of the value; numeric strings are parsed.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            CredentialValue::Number(n) => *n,
            CredentialValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        n.is_finite().then_some(n)
    }

    /// Textual reading of the value, trimmed. Empty text reads as `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CredentialValue::Number(n) => Some(n.to_string()),
            CredentialValue::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

/// A declared credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Credential kind, e.g. `academic_degree`.
    pub kind: String,
    /// Declared value.
    pub value: CredentialValue,
}

impl Credential {
    /// Creates a numeric credential.
    pub fn number(kind: impl Into<String>, value: f64) -> Self {
        Self {
            kind: kind.into(),
            value: CredentialValue::Number(value),
        }
    }

    /// Creates a textual credential.
    pub fn text(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: CredentialValue::Text(value.into()),
        }
    }
}

/// A registered evaluator and its authority state.
///
/// Evaluators are never deleted; the three scores accumulate over the
/// evaluator's lifetime. `revision` is bumped by every authority mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluator {
    /// Evaluator identity.
    pub id: String,
    /// Declared credentials.
    pub credentials: Vec<Credential>,
    /// Weighted credential score. May exceed 1.0.
    pub baseline_credential_score: f64,
    /// Exponentially smoothed quality history in [0, 1].
    pub track_record_score: f64,
    /// Clamped combination of baseline, track record and recent performance.
    pub authority_score: f64,
    /// Number of authority mutations applied.
    pub revision: u64,
    /// When the evaluator was registered.
    pub registered_at: DateTime<Utc>,
}

impl Evaluator {
    /// Creates an evaluator with a neutral track record and no authority yet.
    pub fn new(id: impl Into<String>, credentials: Vec<Credential>) -> Self {
        Self {
            id: id.into(),
            credentials,
            baseline_credential_score: 0.0,
            track_record_score: 0.5,
            authority_score: 0.0,
            revision: 0,
            registered_at: Utc::now(),
        }
    }

    /// First credential of the given kind.
    pub fn credential(&self, kind: &str) -> Option<&CredentialValue> {
        self.credentials
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| &c.value)
    }

    /// Declared professional field, lowercased.
    pub fn professional_field(&self) -> Option<String> {
        self.credential(PROFESSIONAL_FIELD)
            .and_then(CredentialValue::as_text)
            .map(|s| s.to_lowercase())
    }

    /// Declared years of professional experience.
    pub fn experience_years(&self) -> Option<f64> {
        self.credential(PROFESSIONAL_EXPERIENCE)
            .and_then(CredentialValue::as_number)
    }

    /// Declared location, lowercased.
    pub fn location(&self) -> Option<String> {
        self.credential(LOCATION)
            .and_then(CredentialValue::as_text)
            .map(|s| s.to_lowercase())
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Closed set of supported task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Open question answering.
    Qa,
    /// Question answering grounded in cited statutory rules.
    StatutoryRuleQa,
    /// Multi-label classification.
    Classification,
    /// Outcome prediction.
    Prediction,
    /// Natural language inference.
    Nli,
    /// Named entity recognition.
    Ner,
}

impl TaskType {
    /// Every task type.
    pub const ALL: [TaskType; 6] = [
        TaskType::Qa,
        TaskType::StatutoryRuleQa,
        TaskType::Classification,
        TaskType::Prediction,
        TaskType::Nli,
        TaskType::Ner,
    ];

    /// Wire name of the task type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Qa => "qa",
            TaskType::StatutoryRuleQa => "statutory_rule_qa",
            TaskType::Classification => "classification",
            TaskType::Prediction => "prediction",
            TaskType::Nli => "nli",
            TaskType::Ner => "ner",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CouncilError::Validation(format!("unknown task type '{}'", s)))
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet accepting feedback.
    Open,
    /// Accepting blind feedback.
    BlindEvaluation,
    /// Consensus has been computed.
    Aggregated,
    /// Finished.
    Closed,
}

impl TaskStatus {
    /// Returns true if `next` directly follows this status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Open, TaskStatus::BlindEvaluation)
                | (TaskStatus::BlindEvaluation, TaskStatus::Aggregated)
                | (TaskStatus::Aggregated, TaskStatus::Closed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Open => "open",
            TaskStatus::BlindEvaluation => "blind_evaluation",
            TaskStatus::Aggregated => "aggregated",
            TaskStatus::Closed => "closed",
        })
    }
}

/// A task put to the evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identity.
    pub id: String,
    /// Task type; fixes the payload shape of its feedback.
    pub task_type: TaskType,
    /// Opaque input payload.
    pub input: Value,
    /// Reference answer, when known.
    pub ground_truth: Option<FeedbackPayload>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates an open task.
    pub fn new(id: impl Into<String>, task_type: TaskType, input: Value) -> Self {
        Self {
            id: id.into(),
            task_type,
            input,
            ground_truth: None,
            status: TaskStatus::Open,
            created_at: Utc::now(),
        }
    }

    /// Attaches a ground-truth payload.
    #[must_use]
    pub fn with_ground_truth(mut self, ground_truth: FeedbackPayload) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Moves the task to `next`.
    ///
    /// # Errors
    ///
    /// Returns `CouncilError::InvalidTransition` if `next` does not directly
    /// follow the current status. The status is left unchanged.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CouncilError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Returns true while the task accepts feedback.
    pub fn accepts_feedback(&self) -> bool {
        self.status == TaskStatus::BlindEvaluation
    }
}

/// A generated answer evaluators give feedback on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Response identity.
    pub id: String,
    /// Owning task.
    pub task_id: String,
    /// Opaque content.
    pub content: Value,
}

impl Response {
    /// Creates a response.
    pub fn new(id: impl Into<String>, task_id: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            content,
        }
    }
}

// =============================================================================
// Feedback payloads
// =============================================================================

/// An evaluator's stance on a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// The answer is right.
    Agree,
    /// The answer is partly right.
    #[serde(alias = "partially", alias = "partial")]
    PartiallyAgree,
    /// The answer is wrong.
    Disagree,
}

impl Position {
    /// Weight multiplier applied to the evaluator's authority.
    pub fn modifier(&self) -> f64 {
        match self {
            Position::Agree => 1.0,
            Position::PartiallyAgree => 0.75,
            Position::Disagree => 0.5,
        }
    }

    /// Wire name of the position.
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Agree => "agree",
            Position::PartiallyAgree => "partially_agree",
            Position::Disagree => "disagree",
        }
    }
}

/// Self-reported confidence level for statutory rule answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// Confident.
    High,
    /// Reasonably sure.
    #[default]
    Medium,
    /// Unsure.
    Low,
}

impl ConfidenceLevel {
    /// Weight multiplier applied to the evaluator's authority.
    pub fn factor(&self) -> f64 {
        match self {
            ConfidenceLevel::High => 1.0,
            ConfidenceLevel::Medium => 0.75,
            ConfidenceLevel::Low => 0.5,
        }
    }
}

/// NLI relation between premise and hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NliLabel {
    /// Premise entails hypothesis.
    Entailment,
    /// Premise contradicts hypothesis.
    Contradiction,
    /// Neither.
    Neutral,
}

impl NliLabel {
    /// Wire name of the label.
    pub fn as_str(&self) -> &'static str {
        match self {
            NliLabel::Entailment => "entailment",
            NliLabel::Contradiction => "contradiction",
            NliLabel::Neutral => "neutral",
        }
    }
}

/// A labelled character span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntitySpan {
    /// Start offset, inclusive.
    pub start: usize,
    /// End offset, exclusive.
    pub end: usize,
    /// Entity label.
    pub label: String,
}

impl fmt::Display for EntitySpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.end, self.label)
    }
}

fn full_confidence() -> f64 {
    1.0
}

/// Typed feedback payload, one case per task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum FeedbackPayload {
    /// Question answering.
    Qa {
        /// Stance on the generated answer.
        position: Position,
        /// The answer the evaluator considers correct.
        validated_answer: String,
    },
    /// Statutory rule question answering.
    StatutoryRuleQa {
        /// Stance on the generated answer.
        position: Position,
        /// The answer the evaluator considers correct.
        validated_answer: String,
        /// Rules the answer should rest on.
        #[serde(default)]
        cited_rules: BTreeSet<String>,
        /// Self-reported confidence.
        #[serde(default)]
        confidence: ConfidenceLevel,
    },
    /// Classification.
    Classification {
        /// Assigned labels.
        labels: BTreeSet<String>,
    },
    /// Outcome prediction.
    Prediction {
        /// Predicted outcome.
        outcome: String,
        /// Self-reported confidence in [0, 1].
        #[serde(default = "full_confidence")]
        confidence: f64,
    },
    /// Natural language inference.
    Nli {
        /// Inference label.
        label: NliLabel,
        /// Self-reported confidence in [0, 1].
        #[serde(default = "full_confidence")]
        confidence: f64,
    },
    /// Named entity recognition.
    Ner {
        /// Recognized entities.
        #[serde(default)]
        entities: BTreeSet<EntitySpan>,
    },
}

/// A payload field as seen by aggregation and scoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Compared by exact (case-insensitive) match.
    Categorical(String),
    /// Free text; compared by normalized match, else token overlap.
    Text(String),
    /// Label or span set; compared by Jaccard overlap.
    Set(BTreeSet<String>),
}

impl FieldValue {
    /// Normalized form: lowercase, trimmed, single-spaced, empty set items dropped.
    pub fn canonical(&self) -> FieldValue {
        match self {
            FieldValue::Categorical(s) => FieldValue::Categorical(s.trim().to_lowercase()),
            FieldValue::Text(s) => FieldValue::Text(
                s.split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase(),
            ),
            FieldValue::Set(items) => FieldValue::Set(
                items
                    .iter()
                    .map(|i| i.trim().to_lowercase())
                    .filter(|i| !i.is_empty())
                    .collect(),
            ),
        }
    }

    /// Single-string rendering of the canonical form.
    pub fn key(&self) -> String {
        match self.canonical() {
            FieldValue::Categorical(s) | FieldValue::Text(s) => s,
            FieldValue::Set(items) => items.into_iter().collect::<Vec<_>>().join(","),
        }
    }
}

impl FeedbackPayload {
    /// Builds a typed payload from a schema-validated field map.
    ///
    /// Rating keys and any other extra keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `CouncilError::Validation` when a required field is missing,
    /// mistyped or out of range.
    pub fn from_fields(task_type: TaskType, fields: &Map<String, Value>) -> Result<Self> {
        let mut object = fields.clone();
        object.insert(
            "task_type".to_string(),
            Value::String(task_type.as_str().to_string()),
        );
        let payload: FeedbackPayload = serde_json::from_value(Value::Object(object))
            .map_err(|e| CouncilError::Validation(format!("{} payload: {}", task_type, e)))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Checks value ranges the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> {
            Err(CouncilError::Validation(format!(
                "{}: {}",
                self.task_type(),
                msg
            )))
        };
        match self {
            FeedbackPayload::Qa {
                validated_answer, ..
            }
            | FeedbackPayload::StatutoryRuleQa {
                validated_answer, ..
            } if validated_answer.trim().is_empty() => invalid("validated_answer is empty"),
            FeedbackPayload::Classification { labels } if labels.is_empty() => {
                invalid("labels is empty")
            }
            FeedbackPayload::Classification { labels }
                if labels.iter().any(|label| label.trim().is_empty()) =>
            {
                invalid("labels contains a blank label")
            }
            FeedbackPayload::Prediction { outcome, .. } if outcome.trim().is_empty() => {
                invalid("outcome is empty")
            }
            FeedbackPayload::Prediction { confidence, .. } | FeedbackPayload::Nli { confidence, .. }
                if !(0.0..=1.0).contains(confidence) =>
            {
                invalid("confidence must lie in [0, 1]")
            }
            FeedbackPayload::Ner { entities }
                if entities
                    .iter()
                    .any(|e| e.start >= e.end || e.label.trim().is_empty()) =>
            {
                invalid("entity spans need start < end and a label")
            }
            _ => Ok(()),
        }
    }

    /// Task type of the payload.
    pub fn task_type(&self) -> TaskType {
        match self {
            FeedbackPayload::Qa { .. } => TaskType::Qa,
            FeedbackPayload::StatutoryRuleQa { .. } => TaskType::StatutoryRuleQa,
            FeedbackPayload::Classification { .. } => TaskType::Classification,
            FeedbackPayload::Prediction { .. } => TaskType::Prediction,
            FeedbackPayload::Nli { .. } => TaskType::Nli,
            FeedbackPayload::Ner { .. } => TaskType::Ner,
        }
    }

    /// Aggregatable fields, in declaration order.
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        match self {
            FeedbackPayload::Qa {
                position,
                validated_answer,
            } => vec![
                ("position", FieldValue::Categorical(position.as_str().to_string())),
                ("validated_answer", FieldValue::Text(validated_answer.trim().to_string())),
            ],
            FeedbackPayload::StatutoryRuleQa {
                position,
                validated_answer,
                cited_rules,
                ..
            } => vec![
                ("position", FieldValue::Categorical(position.as_str().to_string())),
                ("validated_answer", FieldValue::Text(validated_answer.trim().to_string())),
                ("cited_rules", FieldValue::Set(cited_rules.clone())),
            ],
            FeedbackPayload::Classification { labels } => {
                vec![("labels", FieldValue::Set(labels.clone()))]
            }
            FeedbackPayload::Prediction { outcome, .. } => {
                vec![("outcome", FieldValue::Categorical(outcome.trim().to_string()))]
            }
            FeedbackPayload::Nli { label, .. } => {
                vec![("label", FieldValue::Categorical(label.as_str().to_string()))]
            }
            FeedbackPayload::Ner { entities } => vec![(
                "entities",
                FieldValue::Set(entities.iter().map(ToString::to_string).collect()),
            )],
        }
    }

    /// Name of the field that carries the evaluator's position.
    pub fn primary_field(task_type: TaskType) -> &'static str {
        match task_type {
            TaskType::Qa | TaskType::StatutoryRuleQa => "position",
            TaskType::Classification => "labels",
            TaskType::Prediction => "outcome",
            TaskType::Nli => "label",
            TaskType::Ner => "entities",
        }
    }

    /// Canonical rendering of the primary field, used as the position in
    /// bias analysis.
    pub fn position_key(&self) -> String {
        let primary = Self::primary_field(self.task_type());
        self.fields()
            .into_iter()
            .find(|(name, _)| *name == primary)
            .map(|(_, value)| value.key())
            .unwrap_or_default()
    }
}

// =============================================================================
// Feedback entries
// =============================================================================

/// Likert ratings (1 to 5) attached to a feedback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedbackRatings {
    /// Peer helpfulness rating.
    pub helpfulness: Option<u8>,
    /// Self-reported accuracy.
    pub accuracy: Option<u8>,
    /// Community helpfulness rating.
    pub community_helpfulness: Option<u8>,
}

impl FeedbackRatings {
    /// Reads the optional rating keys from a field map.
    ///
    /// # Errors
    ///
    /// Returns `CouncilError::Validation` for a rating that is present but not
    /// an integer between 1 and 5.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self> {
        let read = |key: &str| -> Result<Option<u8>> {
            match fields.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => value
                    .as_u64()
                    .filter(|r| (1..=5).contains(r))
                    .map(|r| Some(r as u8))
                    .ok_or_else(|| {
                        CouncilError::Validation(format!("{} must be an integer from 1 to 5", key))
                    }),
            }
        };
        Ok(Self {
            helpfulness: read("helpfulness")?,
            accuracy: read("accuracy")?,
            community_helpfulness: read("community_helpfulness")?,
        })
    }

    /// Maps a Likert rating onto [0, 1].
    pub fn normalize(rating: Option<u8>) -> Option<f64> {
        rating.map(|r| (f64::from(r.clamp(1, 5)) - 1.0) / 4.0)
    }
}

/// One evaluator's feedback on one response.
///
/// Only `consistency_score` and `correctness_score` change after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Entry identity.
    pub id: String,
    /// Task the feedback belongs to.
    pub task_id: String,
    /// Submitting evaluator.
    pub evaluator_id: String,
    /// Response the feedback is about.
    pub response_id: String,
    /// Typed payload.
    pub payload: FeedbackPayload,
    /// Optional ratings.
    #[serde(default)]
    pub ratings: FeedbackRatings,
    /// Agreement with the consensus, once computed.
    pub consistency_score: Option<f64>,
    /// Agreement with ground truth, once computed.
    pub correctness_score: Option<f64>,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

impl FeedbackEntry {
    /// Creates an unscored entry with a fresh id.
    pub fn new(
        task_id: impl Into<String>,
        evaluator_id: impl Into<String>,
        response_id: impl Into<String>,
        payload: FeedbackPayload,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            evaluator_id: evaluator_id.into(),
            response_id: response_id.into(),
            payload,
            ratings: FeedbackRatings::default(),
            consistency_score: None,
            correctness_score: None,
            submitted_at: Utc::now(),
        }
    }

    /// Attaches ratings.
    #[must_use]
    pub fn with_ratings(mut self, ratings: FeedbackRatings) -> Self {
        self.ratings = ratings;
        self
    }

    /// Task type of the payload.
    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }
}

/// Append-only bias audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    /// Audited task.
    pub task_id: String,
    /// Evaluator, for per-evaluator dimensions.
    pub evaluator_id: Option<String>,
    /// Dimension name, or `total`.
    pub dimension: String,
    /// Score in [0, 1] (the total may reach sqrt(6)).
    pub score: f64,
    /// Structured detail.
    pub details: Value,
    /// When the report was produced.
    pub created_at: DateTime<Utc>,
}
