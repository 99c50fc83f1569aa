//! Multi-dimensional bias detection over a task's feedback population.
//!
//! Six independent estimators, each in [0, 1]:
//!
//! | Dimension | Estimator |
//! |-----------|-----------|
//! | `demographic_bias` | mean max-class fraction of positions within experience buckets |
//! | `professional_clustering` | per evaluator: 1 if they differ from their field's majority |
//! | `temporal_bias` | total variation distance of positions, first half vs second half |
//! | `geographic_bias` | as demographic, grouped by location (else professional field) |
//! | `confirmation_bias` | per evaluator: share of earlier same-type positions matching the current one |
//! | `anchoring_bias` | share of later entries matching the majority of the first three |
//!
//! Per-evaluator dimensions report the mean over evaluators as the task value.
//! The total is `sqrt(Σ b²)`, graded low below 0.5, medium below 1.0 and high
//! otherwise.
//!
//! ## Mitigations
//!
//! Any dimension at or above `mitigation_threshold` triggers a fixed
//! recommendation:
//!
//! | Dimension | Priority | Intervention |
//! |-----------|----------|--------------|
//! | demographic | high | recruit evaluators from under-represented experience levels |
//! | professional clustering | medium | review dissent against field majorities |
//! | temporal | medium | re-randomize submission order and shorten windows |
//! | geographic | medium | broaden the regional mix of evaluators |
//! | confirmation | high | assign tasks outside each evaluator's prior stance |
//! | anchoring | high | hide early submissions until the blind window closes |

use crate::models::BiasReport;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Label for feedback whose grouping attribute is missing.
pub const UNKNOWN_GROUP: &str = "unknown";

/// Configuration for bias detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    /// Per-dimension score that triggers a mitigation.
    pub mitigation_threshold: f64,
    /// Total at which the level becomes medium.
    pub medium_threshold: f64,
    /// Total at which the level becomes high.
    pub high_threshold: f64,
    /// Number of leading entries that form the anchor.
    pub anchor_window: usize,
    /// Number of top contributing dimensions surfaced.
    pub top_dimensions: usize,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            mitigation_threshold: 0.6,
            medium_threshold: 0.5,
            high_threshold: 1.0,
            anchor_window: 3,
            top_dimensions: 3,
        }
    }
}

impl BiasConfig {
    /// Sets the mitigation threshold.
    #[must_use]
    pub fn with_mitigation_threshold(mut self, threshold: f64) -> Self {
        self.mitigation_threshold = threshold;
        self
    }

    /// Sets the level thresholds.
    #[must_use]
    pub fn with_level_thresholds(mut self, medium: f64, high: f64) -> Self {
        self.medium_threshold = medium;
        self.high_threshold = high;
        self
    }
}

/// The six bias dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDimension {
    /// Homogeneity within experience buckets.
    Demographic,
    /// Dissent from the professional group majority.
    ProfessionalClustering,
    /// Drift between early and late feedback.
    Temporal,
    /// Homogeneity within regions.
    Geographic,
    /// Agreement with one's own earlier positions.
    Confirmation,
    /// Agreement with the first entries.
    Anchoring,
}

impl BiasDimension {
    /// Every dimension, in reporting order.
    pub const ALL: [BiasDimension; 6] = [
        BiasDimension::Demographic,
        BiasDimension::ProfessionalClustering,
        BiasDimension::Temporal,
        BiasDimension::Geographic,
        BiasDimension::Confirmation,
        BiasDimension::Anchoring,
    ];

    /// Report name of the dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasDimension::Demographic => "demographic_bias",
            BiasDimension::ProfessionalClustering => "professional_clustering",
            BiasDimension::Temporal => "temporal_bias",
            BiasDimension::Geographic => "geographic_bias",
            BiasDimension::Confirmation => "confirmation_bias",
            BiasDimension::Anchoring => "anchoring_bias",
        }
    }

    /// Returns true for dimensions computed per evaluator.
    pub fn is_per_evaluator(&self) -> bool {
        matches!(
            self,
            BiasDimension::ProfessionalClustering | BiasDimension::Confirmation
        )
    }

    fn mitigation(&self) -> (Priority, &'static str) {
        match self {
            BiasDimension::Demographic => (
                Priority::High,
                "Recruit evaluators from under-represented experience levels",
            ),
            BiasDimension::ProfessionalClustering => (
                Priority::Medium,
                "Review dissenting feedback against professional group majorities",
            ),
            BiasDimension::Temporal => (
                Priority::Medium,
                "Re-randomize task presentation order and shorten evaluation windows",
            ),
            BiasDimension::Geographic => (
                Priority::Medium,
                "Broaden the regional mix of the evaluator pool",
            ),
            BiasDimension::Confirmation => (
                Priority::High,
                "Assign tasks that challenge each evaluator's prior stance",
            ),
            BiasDimension::Anchoring => (
                Priority::High,
                "Hide early submissions until the blind evaluation window closes",
            ),
        }
    }
}

impl fmt::Display for BiasDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall bias grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasLevel {
    /// Below the medium threshold.
    Low,
    /// Between the medium and high thresholds.
    Medium,
    /// At or above the high threshold.
    High,
}

/// Mitigation urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Act before the next round.
    High,
    /// Act when convenient.
    Medium,
}

/// A recommended intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mitigation {
    /// Dimension that triggered it.
    pub dimension: BiasDimension,
    /// Urgency.
    pub priority: Priority,
    /// Suggested intervention.
    pub action: String,
    /// Score that triggered it.
    pub score: f64,
}

/// One feedback entry as seen by bias detection, in submission order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BiasSample {
    /// Submitting evaluator.
    pub evaluator_id: String,
    /// Canonical position (primary field value).
    pub position: String,
    /// Declared years of experience.
    pub experience_years: Option<f64>,
    /// Declared professional field.
    pub professional_field: Option<String>,
    /// Declared location.
    pub location: Option<String>,
    /// The evaluator's positions on earlier tasks of the same type.
    pub prior_positions: Vec<String>,
}

/// Result of a bias analysis for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasAnalysis {
    /// Audited task.
    pub task_id: String,
    /// Task-level score per dimension.
    pub dimensions: BTreeMap<BiasDimension, f64>,
    /// Per-evaluator scores for per-evaluator dimensions.
    pub per_evaluator: BTreeMap<BiasDimension, BTreeMap<String, f64>>,
    /// `sqrt(Σ b²)` over the dimensions.
    pub total_bias: f64,
    /// Grade of the total.
    pub level: BiasLevel,
    /// Highest non-zero dimensions, strongest first.
    pub top_dimensions: Vec<BiasDimension>,
    /// Recommended interventions.
    pub mitigations: Vec<Mitigation>,
    /// Number of samples analysed.
    pub sample_count: usize,
}

impl BiasAnalysis {
    /// Score of one dimension.
    pub fn score(&self, dimension: BiasDimension) -> f64 {
        self.dimensions.get(&dimension).copied().unwrap_or(0.0)
    }

    /// Expands the analysis into append-only report rows: one per
    /// dimension, one per evaluator for per-evaluator dimensions, and a
    /// `total` row.
    pub fn reports(&self) -> Vec<BiasReport> {
        let created_at = Utc::now();
        let mut reports = Vec::new();

        for (dimension, score) in &self.dimensions {
            reports.push(BiasReport {
                task_id: self.task_id.clone(),
                evaluator_id: None,
                dimension: dimension.as_str().to_string(),
                score: *score,
                details: json!({ "sample_count": self.sample_count }),
                created_at,
            });
        }

        for (dimension, scores) in &self.per_evaluator {
            for (evaluator_id, score) in scores {
                reports.push(BiasReport {
                    task_id: self.task_id.clone(),
                    evaluator_id: Some(evaluator_id.clone()),
                    dimension: dimension.as_str().to_string(),
                    score: *score,
                    details: json!({ "scope": "evaluator" }),
                    created_at,
                });
            }
        }

        reports.push(BiasReport {
            task_id: self.task_id.clone(),
            evaluator_id: None,
            dimension: "total".to_string(),
            score: self.total_bias,
            details: json!({
                "level": self.level,
                "top_dimensions": self.top_dimensions,
                "mitigations": self.mitigations,
            }),
            created_at,
        });
        reports
    }
}

/// Bias detector.
///
/// # Example
///
/// ```rust
/// use rlcf_council::{BiasDetector, BiasSample, BiasDimension};
///
/// let detector = BiasDetector::default();
/// let samples: Vec<BiasSample> = (0..5)
///     .map(|i| BiasSample {
///         evaluator_id: format!("e{}", i),
///         position: "agree".to_string(),
///         professional_field: Some("civil law".to_string()),
///         ..Default::default()
///     })
///     .collect();
///
/// let analysis = detector.analyze("task-1", &samples);
/// assert_eq!(analysis.score(BiasDimension::Geographic), 1.0);
/// assert_eq!(analysis.score(BiasDimension::ProfessionalClustering), 0.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BiasDetector {
    config: BiasConfig,
}

impl BiasDetector {
    /// Creates a detector.
    pub fn new(config: BiasConfig) -> Self {
        Self { config }
    }

    /// Runs all six estimators over a task's samples.
    pub fn analyze(&self, task_id: &str, samples: &[BiasSample]) -> BiasAnalysis {
        let professional = professional_clustering(samples);
        let confirmation = confirmation(samples);

        let mut dimensions = BTreeMap::new();
        dimensions.insert(BiasDimension::Demographic, demographic(samples));
        dimensions.insert(BiasDimension::ProfessionalClustering, mean(professional.values()));
        dimensions.insert(BiasDimension::Temporal, temporal(samples));
        dimensions.insert(BiasDimension::Geographic, geographic(samples));
        dimensions.insert(BiasDimension::Confirmation, mean(confirmation.values()));
        dimensions.insert(
            BiasDimension::Anchoring,
            anchoring(samples, self.config.anchor_window),
        );

        let mut per_evaluator = BTreeMap::new();
        per_evaluator.insert(BiasDimension::ProfessionalClustering, professional);
        per_evaluator.insert(BiasDimension::Confirmation, confirmation);

        let total_bias = total_bias(dimensions.values().copied());
        let level = if total_bias >= self.config.high_threshold {
            BiasLevel::High
        } else if total_bias >= self.config.medium_threshold {
            BiasLevel::Medium
        } else {
            BiasLevel::Low
        };

        let mut ranked: Vec<(BiasDimension, f64)> = BiasDimension::ALL
            .iter()
            .map(|d| (*d, dimensions[d]))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top_dimensions = ranked
            .iter()
            .take(self.config.top_dimensions)
            .map(|(d, _)| *d)
            .collect();

        let mitigations = BiasDimension::ALL
            .iter()
            .filter(|d| dimensions[*d] >= self.config.mitigation_threshold)
            .map(|d| {
                let (priority, action) = d.mitigation();
                Mitigation {
                    dimension: *d,
                    priority,
                    action: action.to_string(),
                    score: dimensions[d],
                }
            })
            .collect();

        debug!(
            "Bias analysis for {}: total {:.3} ({:?}) over {} samples",
            task_id,
            total_bias,
            level,
            samples.len()
        );

        BiasAnalysis {
            task_id: task_id.to_string(),
            dimensions,
            per_evaluator,
            total_bias,
            level,
            top_dimensions,
            mitigations,
            sample_count: samples.len(),
        }
    }
}

/// Euclidean norm of the dimension scores.
pub fn total_bias<I: IntoIterator<Item = f64>>(scores: I) -> f64 {
    scores.into_iter().map(|b| b * b).sum::<f64>().sqrt()
}

/// Experience bucket label for a number of years.
pub fn experience_bucket(years: Option<f64>) -> &'static str {
    match years {
        Some(y) if y.is_finite() && y >= 0.0 => {
            if y < 3.0 {
                "0-2"
            } else if y < 6.0 {
                "3-5"
            } else if y <= 10.0 {
                "6-10"
            } else {
                "10+"
            }
        }
        _ => UNKNOWN_GROUP,
    }
}

fn mean<'a, I: Iterator<Item = &'a f64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Counts positions, remembering first-seen order for tie-breaks.
fn counts<'a, I: IntoIterator<Item = &'a str>>(positions: I) -> Vec<(&'a str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for position in positions {
        match counts.iter_mut().find(|(p, _)| *p == position) {
            Some((_, n)) => *n += 1,
            None => counts.push((position, 1)),
        }
    }
    counts
}

/// Most frequent position; earliest on ties.
fn majority<'a, I: IntoIterator<Item = &'a str>>(positions: I) -> Option<(&'a str, usize)> {
    let mut best: Option<(&str, usize)> = None;
    for (position, n) in counts(positions) {
        if best.map_or(true, |(_, m)| n > m) {
            best = Some((position, n));
        }
    }
    best
}

/// Mean over groups of the max-class fraction of positions.
fn homogeneity<'a, F>(samples: &'a [BiasSample], group_of: F) -> f64
where
    F: Fn(&'a BiasSample) -> String,
{
    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry(group_of(sample))
            .or_default()
            .push(sample.position.as_str());
    }
    let fractions: Vec<f64> = groups
        .values()
        .filter_map(|positions| {
            let (_, top) = majority(positions.iter().copied())?;
            Some(top as f64 / positions.len() as f64)
        })
        .collect();
    mean(fractions.iter())
}

fn demographic(samples: &[BiasSample]) -> f64 {
    homogeneity(samples, |s| experience_bucket(s.experience_years).to_string())
}

fn geographic(samples: &[BiasSample]) -> f64 {
    homogeneity(samples, |s| {
        s.location
            .clone()
            .or_else(|| s.professional_field.clone())
            .unwrap_or_else(|| UNKNOWN_GROUP.to_string())
    })
}

fn professional_clustering(samples: &[BiasSample]) -> BTreeMap<String, f64> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for sample in samples {
        if let Some(field) = sample.professional_field.as_deref() {
            groups.entry(field).or_default().push(sample.position.as_str());
        }
    }

    samples
        .iter()
        .map(|sample| {
            let score = sample
                .professional_field
                .as_deref()
                .and_then(|field| groups.get(field))
                .filter(|positions| positions.len() >= 2)
                .and_then(|positions| majority(positions.iter().copied()))
                .map_or(0.0, |(top, _)| if top == sample.position { 0.0 } else { 1.0 });
            (sample.evaluator_id.clone(), score)
        })
        .collect()
}

fn temporal(samples: &[BiasSample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let (first, second) = samples.split_at(samples.len() / 2);
    let distribution = |half: &[BiasSample]| -> BTreeMap<String, f64> {
        let mut freq = BTreeMap::new();
        for sample in half {
            *freq.entry(sample.position.clone()).or_insert(0.0) += 1.0 / half.len() as f64;
        }
        freq
    };
    let (p, q) = (distribution(first), distribution(second));
    let delta: f64 = p
        .keys()
        .chain(q.keys())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .map(|k| (p.get(k).copied().unwrap_or(0.0) - q.get(k).copied().unwrap_or(0.0)).abs())
        .sum();
    (delta / 2.0).clamp(0.0, 1.0)
}

fn confirmation(samples: &[BiasSample]) -> BTreeMap<String, f64> {
    samples
        .iter()
        .map(|sample| {
            let score = if sample.prior_positions.is_empty() {
                0.0
            } else {
                let matching = sample
                    .prior_positions
                    .iter()
                    .filter(|p| **p == sample.position)
                    .count();
                matching as f64 / sample.prior_positions.len() as f64
            };
            (sample.evaluator_id.clone(), score)
        })
        .collect()
}

fn anchoring(samples: &[BiasSample], window: usize) -> f64 {
    if window == 0 || samples.len() <= window {
        return 0.0;
    }
    let (anchor, rest) = samples.split_at(window);
    match majority(anchor.iter().map(|s| s.position.as_str())) {
        Some((position, n)) if n * 2 > window => {
            rest.iter().filter(|s| s.position == position).count() as f64 / rest.len() as f64
        }
        _ => 0.0,
    }
}
