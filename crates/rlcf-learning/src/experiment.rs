//! # Experiment Tracker
//!
//! A/B rollout of alternative weight documents.
//!
//! ## Lifecycle
//!
//! ```text
//!            start              complete(winner)
//!  Draft ──────────► Running ──────────────────► Completed
//!                       │
//!                       └──── stop ────────────► Stopped
//! ```
//!
//! ## Assignment
//!
//! A subject lands at a fixed point of the unit interval:
//!
//! ```text
//! h     = SHA-256("{experiment_id}:{subject_id}")
//! point = (u64_be(h[0..8]) mod 10 000) / 10 000
//! ```
//!
//! and receives the variant whose cumulative allocation interval contains
//! that point. The hash alone makes assignment stable across processes; the
//! in-process cache only saves recomputation.
//!
//! ## Variant Scopes
//!
//! Starting an experiment saves every variant's document in the weight
//! store under its own scope, [`variant_scope`]. The learner can then refine
//! a variant by updating with that scope id, and completion promotes the
//! winner's latest version.
//!
//! ## Analysis
//!
//! The first variant is the control. A winner is declared once every variant
//! has at least `min_samples` outcomes and the best other variant improves
//! on the control mean by at least `improvement_threshold` (relative). This
//! is a fixed-threshold heuristic; `p_value` is never computed.

use crate::error::{LearningError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rlcf_weights::{WeightConfig, WeightStore, WeightVersion};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of hash buckets on the unit interval.
pub const ASSIGNMENT_BUCKETS: u64 = 10_000;

/// Configuration for experiment tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Outcomes every variant needs before a winner can be declared.
    pub min_samples: usize,
    /// Relative improvement over the control required for a winner.
    pub improvement_threshold: f64,
    /// Accepted deviation of the allocation sum from 1.0.
    pub allocation_tolerance: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            min_samples: 30,
            improvement_threshold: 0.05,
            allocation_tolerance: 1e-6,
        }
    }
}

impl ExperimentConfig {
    /// Sets the minimum samples per variant.
    #[must_use]
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Sets the relative improvement threshold.
    #[must_use]
    pub fn with_improvement_threshold(mut self, threshold: f64) -> Self {
        self.improvement_threshold = threshold;
        self
    }
}

/// Experiment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Created, not yet assigning.
    Draft,
    /// Assigning subjects and collecting outcomes.
    Running,
    /// A winner was promoted.
    Completed,
    /// Abandoned without promotion.
    Stopped,
}

impl ExperimentStatus {
    /// Returns true if the lifecycle allows moving to `next`.
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        matches!(
            (self, next),
            (ExperimentStatus::Draft, ExperimentStatus::Running)
                | (ExperimentStatus::Running, ExperimentStatus::Completed)
                | (ExperimentStatus::Running, ExperimentStatus::Stopped)
        )
    }

    /// Lowercase status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named alternative weight document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant name, unique within the experiment.
    pub name: String,
    /// The document under test.
    pub config: WeightConfig,
    /// Share of subjects routed to this variant.
    pub allocation: f64,
}

/// An A/B experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Generated id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Variants; the first is the control.
    pub variants: Vec<Variant>,
    /// Lifecycle status.
    pub status: ExperimentStatus,
    /// Outcome samples per variant name.
    pub outcomes: BTreeMap<String, Vec<f64>>,
    /// Promoted variant, once completed.
    pub winner: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last lifecycle change.
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Allocation ratios in variant order.
    pub fn allocations(&self) -> Vec<f64> {
        self.variants.iter().map(|v| v.allocation).collect()
    }

    /// Looks up a variant by name.
    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// The control variant.
    pub fn control(&self) -> Option<&Variant> {
        self.variants.first()
    }
}

/// Per-variant outcome summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantStats {
    /// Variant name.
    pub name: String,
    /// Number of outcomes.
    pub samples: usize,
    /// Mean outcome, 0.0 without samples.
    pub mean: f64,
}

/// Outcome analysis of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentAnalysis {
    /// Analysed experiment.
    pub experiment_id: String,
    /// Statistics in variant order.
    pub variants: Vec<VariantStats>,
    /// Best non-control variant by mean.
    pub best: Option<String>,
    /// `(best − control) / |control|`; `None` when the control mean is zero.
    pub relative_improvement: Option<f64>,
    /// Whether every variant reached `min_samples`.
    pub sufficient_samples: bool,
    /// Whether the improvement clears the threshold with sufficient samples.
    pub significant: bool,
    /// Always `None`: no hypothesis test is performed.
    pub p_value: Option<f64>,
    /// Declared winner, when significant.
    pub winner: Option<String>,
}

/// Point of the unit interval a subject hashes to, in `[0, 1)`.
pub fn assignment_point(experiment_id: &str, subject_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{}:{}", experiment_id, subject_id).as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % ASSIGNMENT_BUCKETS) as f64 / ASSIGNMENT_BUCKETS as f64
}

/// Index of the allocation interval containing `point`.
///
/// Rounding slack at the top of the interval falls to the last variant.
/// Returns `None` only for an empty allocation.
pub fn select_variant(point: f64, allocations: &[f64]) -> Option<usize> {
    let mut cumulative = 0.0;
    for (index, share) in allocations.iter().enumerate() {
        cumulative += share;
        if point < cumulative {
            return Some(index);
        }
    }
    allocations.len().checked_sub(1)
}

/// Weight store scope id holding one variant's document.
pub fn variant_scope(experiment_id: &str, variant: &str) -> String {
    format!("{}/{}", experiment_id, variant)
}

/// Checks variants and allocation ratios before creation.
///
/// # Errors
///
/// `Allocation` when there are fewer than two variants, the counts differ,
/// a ratio is negative or not finite, names are empty, contain NUL or repeat,
/// or the ratios do not sum
/// to 1.0 within `tolerance`. `Weights` when a variant document is invalid.
pub fn validate_allocation(
    variants: &[(String, WeightConfig)],
    allocations: &[f64],
    tolerance: f64,
) -> Result<()> {
    if variants.len() < 2 {
        return Err(LearningError::Allocation(format!(
            "an experiment needs at least two variants, got {}",
            variants.len()
        )));
    }
    if variants.len() != allocations.len() {
        return Err(LearningError::Allocation(format!(
            "{} variants but {} allocation ratios",
            variants.len(),
            allocations.len()
        )));
    }
    if let Some(bad) = allocations.iter().find(|r| !r.is_finite() || **r < 0.0) {
        return Err(LearningError::Allocation(format!(
            "allocation ratio {} must be a non-negative number",
            bad
        )));
    }
    let sum: f64 = allocations.iter().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(LearningError::Allocation(format!(
            "allocation ratios sum to {:.6}, expected 1.0",
            sum
        )));
    }
    for (index, (name, config)) in variants.iter().enumerate() {
        if name.is_empty() || name.contains('\0') {
            return Err(LearningError::Allocation(format!(
                "variant name {:?} must be non-empty and free of NUL",
                name
            )));
        }
        if variants[..index].iter().any(|(other, _)| other == name) {
            return Err(LearningError::Allocation(format!(
                "duplicate variant name {}",
                name
            )));
        }
        config.validate()?;
    }
    Ok(())
}

/// Tracks experiments, assignments and outcomes.
///
/// # Example
///
/// ```rust
/// use rlcf_learning::{ExperimentConfig, ExperimentTracker};
/// use rlcf_weights::{WeightConfig, WeightStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(WeightStore::temporary().unwrap());
/// let tracker = ExperimentTracker::new(store, ExperimentConfig::default());
///
/// let variants = vec![
///     ("control".to_string(), WeightConfig::default()),
///     ("treatment".to_string(), WeightConfig::default()),
/// ];
/// assert!(tracker.create("alpha sweep", variants.clone(), &[0.6, 0.3]).is_err());
///
/// let id = tracker.create("alpha sweep", variants, &[0.5, 0.5]).unwrap();
/// tracker.start(&id).unwrap();
/// let first = tracker.assign_variant(&id, "user-42").unwrap();
/// assert_eq!(tracker.assign_variant(&id, "user-42").unwrap(), first);
/// ```
pub struct ExperimentTracker {
    store: Arc<WeightStore>,
    config: ExperimentConfig,
    experiments: DashMap<String, Experiment>,
    assignments: DashMap<(String, String), String>,
}

impl ExperimentTracker {
    /// Creates a tracker promoting winners through `store`.
    pub fn new(store: Arc<WeightStore>, config: ExperimentConfig) -> Self {
        Self {
            store,
            config,
            experiments: DashMap::new(),
            assignments: DashMap::new(),
        }
    }

    /// The tracker's configuration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Creates a draft experiment and returns its id.
    ///
    /// Nothing is registered when validation fails.
    pub fn create(
        &self,
        name: &str,
        variants: Vec<(String, WeightConfig)>,
        allocations: &[f64],
    ) -> Result<String> {
        validate_allocation(&variants, allocations, self.config.allocation_tolerance)?;

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let experiment = Experiment {
            id: id.clone(),
            name: name.to_string(),
            outcomes: variants
                .iter()
                .map(|(variant, _)| (variant.clone(), Vec::new()))
                .collect(),
            variants: variants
                .into_iter()
                .zip(allocations)
                .map(|((name, config), allocation)| Variant {
                    name,
                    config,
                    allocation: *allocation,
                })
                .collect(),
            status: ExperimentStatus::Draft,
            winner: None,
            created_at: now,
            updated_at: now,
        };

        info!(
            "Created experiment {} ({}) with {} variants",
            id,
            name,
            experiment.variants.len()
        );
        self.experiments.insert(id.clone(), experiment);
        Ok(id)
    }

    /// Snapshot of an experiment.
    pub fn get(&self, experiment_id: &str) -> Result<Experiment> {
        self.experiments
            .get(experiment_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LearningError::UnknownExperiment(experiment_id.to_string()))
    }

    /// Ids of all experiments, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.experiments.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Seeds each variant's scope, then moves a draft experiment to running.
    ///
    /// Scopes that already hold versions are left as they are. If seeding
    /// fails the experiment stays a draft and can be started again.
    pub fn start(&self, experiment_id: &str) -> Result<()> {
        let mut entry = self.entry(experiment_id)?;
        if !entry.status.can_transition_to(ExperimentStatus::Running) {
            return Err(LearningError::InvalidTransition {
                from: entry.status,
                to: ExperimentStatus::Running,
            });
        }
        for variant in &entry.variants {
            let scope = variant_scope(experiment_id, &variant.name);
            if self.store.latest_version(Some(&scope))?.is_none() {
                self.store
                    .save(variant.config.clone(), Some(&scope), BTreeMap::new())?;
            }
        }
        transition(&mut entry, ExperimentStatus::Running)?;
        info!("Started experiment {}", experiment_id);
        Ok(())
    }

    /// Abandons a running experiment.
    pub fn stop(&self, experiment_id: &str) -> Result<()> {
        let mut entry = self.entry(experiment_id)?;
        transition(&mut entry, ExperimentStatus::Stopped)?;
        self.forget_assignments(experiment_id);
        warn!("Stopped experiment {} without promotion", experiment_id);
        Ok(())
    }

    /// Deterministically assigns a subject to a variant of a running
    /// experiment.
    pub fn assign_variant(&self, experiment_id: &str, subject_id: &str) -> Result<String> {
        let experiment = self.get(experiment_id)?;
        if experiment.status != ExperimentStatus::Running {
            return Err(LearningError::NotRunning {
                experiment: experiment_id.to_string(),
                status: experiment.status,
            });
        }

        let key = (experiment_id.to_string(), subject_id.to_string());
        if let Some(cached) = self.assignments.get(&key) {
            return Ok(cached.value().clone());
        }

        let point = assignment_point(experiment_id, subject_id);
        let index = select_variant(point, &experiment.allocations()).ok_or_else(|| {
            LearningError::Allocation(format!("experiment {} has no variants", experiment_id))
        })?;
        let variant = experiment.variants[index].name.clone();
        debug!(
            "Assigned {} to {} in {} (point {:.4})",
            subject_id, variant, experiment_id, point
        );
        self.assignments.insert(key, variant.clone());
        Ok(variant)
    }

    /// The weight document a subject should use, with the store scope it
    /// resolves from.
    pub fn config_for(&self, experiment_id: &str, subject_id: &str) -> Result<(String, Arc<WeightConfig>)> {
        let variant = self.assign_variant(experiment_id, subject_id)?;
        let scope = variant_scope(experiment_id, &variant);
        let config = self.store.get_config(Some(&scope))?;
        Ok((scope, config))
    }

    /// Records one outcome sample for a variant of a running experiment.
    pub fn record_outcome(&self, experiment_id: &str, variant: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(LearningError::InvalidOutcome(format!(
                "{} is not a finite outcome",
                value
            )));
        }
        let mut entry = self.entry(experiment_id)?;
        if entry.status != ExperimentStatus::Running {
            return Err(LearningError::NotRunning {
                experiment: experiment_id.to_string(),
                status: entry.status,
            });
        }
        let samples = entry
            .outcomes
            .get_mut(variant)
            .ok_or_else(|| LearningError::UnknownVariant {
                experiment: experiment_id.to_string(),
                variant: variant.to_string(),
            })?;
        samples.push(value);
        Ok(())
    }

    /// Summarizes outcomes and decides whether a winner exists.
    pub fn analyze(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        let experiment = self.get(experiment_id)?;
        Ok(analyze_experiment(&experiment, &self.config))
    }

    /// Completes a running experiment by promoting `winner` to the persisted
    /// default.
    ///
    /// The promoted document is the winner's latest version in its scope,
    /// which includes any learning applied during the experiment.
    pub fn complete(&self, experiment_id: &str, winner: &str) -> Result<WeightVersion> {
        let mut entry = self.entry(experiment_id)?;
        let variant = entry
            .variant(winner)
            .cloned()
            .ok_or_else(|| LearningError::UnknownVariant {
                experiment: experiment_id.to_string(),
                variant: winner.to_string(),
            })?;
        if !entry.status.can_transition_to(ExperimentStatus::Completed) {
            return Err(LearningError::InvalidTransition {
                from: entry.status,
                to: ExperimentStatus::Completed,
            });
        }

        let scope = variant_scope(experiment_id, winner);
        let config = match self.store.latest_version(Some(&scope))? {
            Some(version) => version.config,
            None => variant.config,
        };
        let analysis = analyze_experiment(&entry, &self.config);
        let mut metrics = BTreeMap::new();
        if let Some(stats) = analysis.variants.iter().find(|s| s.name == winner) {
            metrics.insert("mean".to_string(), stats.mean);
            metrics.insert("samples".to_string(), stats.samples as f64);
        }
        if let Some(improvement) = analysis.relative_improvement {
            metrics.insert("relative_improvement".to_string(), improvement);
        }

        let version = self.store.save(config, None, metrics)?;
        transition(&mut entry, ExperimentStatus::Completed)?;
        entry.winner = Some(winner.to_string());
        self.forget_assignments(experiment_id);
        info!(
            "Completed experiment {}: promoted {} as default revision {}",
            experiment_id, winner, version.revision
        );
        Ok(version)
    }

    fn forget_assignments(&self, experiment_id: &str) {
        self.assignments.retain(|(experiment, _), _| experiment != experiment_id);
    }

    fn entry(
        &self,
        experiment_id: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, String, Experiment>> {
        self.experiments
            .get_mut(experiment_id)
            .ok_or_else(|| LearningError::UnknownExperiment(experiment_id.to_string()))
    }
}

impl fmt::Debug for ExperimentTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentTracker")
            .field("config", &self.config)
            .field("experiments", &self.experiments.len())
            .field("cached_assignments", &self.assignments.len())
            .finish()
    }
}

fn transition(experiment: &mut Experiment, next: ExperimentStatus) -> Result<()> {
    if !experiment.status.can_transition_to(next) {
        return Err(LearningError::InvalidTransition {
            from: experiment.status,
            to: next,
        });
    }
    debug!("Experiment {}: {} -> {}", experiment.id, experiment.status, next);
    experiment.status = next;
    experiment.updated_at = Utc::now();
    Ok(())
}

fn analyze_experiment(experiment: &Experiment, config: &ExperimentConfig) -> ExperimentAnalysis {
    let variants: Vec<VariantStats> = experiment
        .variants
        .iter()
        .map(|variant| {
            let samples = experiment
                .outcomes
                .get(&variant.name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let mean = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };
            VariantStats {
                name: variant.name.clone(),
                samples: samples.len(),
                mean,
            }
        })
        .collect();

    let sufficient_samples = variants.iter().all(|s| s.samples >= config.min_samples);
    let control = variants.first();
    let best = variants
        .iter()
        .skip(1)
        .fold(None::<&VariantStats>, |best, s| match best {
            Some(b) if b.mean >= s.mean => Some(b),
            _ => Some(s),
        });

    let relative_improvement = match (control, best) {
        (Some(control), Some(best)) if control.mean != 0.0 => {
            Some((best.mean - control.mean) / control.mean.abs())
        }
        _ => None,
    };
    let significant = sufficient_samples
        && relative_improvement.is_some_and(|r| r >= config.improvement_threshold);
    let best = best.map(|b| b.name.clone());
    let winner = if significant { best.clone() } else { None };

    ExperimentAnalysis {
        experiment_id: experiment.id.clone(),
        variants,
        best,
        relative_improvement,
        sufficient_samples,
        significant,
        p_value: None,
        winner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker() -> (Arc<WeightStore>, ExperimentTracker) {
        let store = Arc::new(WeightStore::temporary().unwrap());
        let tracker = ExperimentTracker::new(
            store.clone(),
            ExperimentConfig::default().with_min_samples(3),
        );
        (store, tracker)
    }

    fn variants() -> Vec<(String, WeightConfig)> {
        let mut treatment = WeightConfig::default();
        treatment.retrieval.alpha.set_value(0.8);
        vec![
            ("control".to_string(), WeightConfig::default()),
            ("treatment".to_string(), treatment),
        ]
    }

    #[test]
    fn test_allocation_validation() {
        let (_, tracker) = tracker();
        assert!(matches!(
            tracker.create("x", variants(), &[0.6, 0.3]),
            Err(LearningError::Allocation(_))
        ));
        assert!(tracker.create("x", variants(), &[1.0]).is_err());
        assert!(tracker.create("x", variants(), &[1.5, -0.5]).is_err());
        assert!(tracker.create("x", variants()[..1].to_vec(), &[1.0]).is_err());

        let mut duplicate = variants();
        duplicate[1].0 = "control".to_string();
        assert!(tracker.create("x", duplicate, &[0.5, 0.5]).is_err());

        let mut invalid = variants();
        invalid[1].1.retrieval.alpha.default = 5.0;
        assert!(matches!(
            tracker.create("x", invalid, &[0.5, 0.5]),
            Err(LearningError::Weights(_))
        ));

        assert!(tracker.ids().is_empty());
        assert!(tracker.create("x", variants(), &[0.5, 0.5]).is_ok());
        assert!(tracker.create("y", variants(), &[0.7, 0.3]).is_ok());
        assert_eq!(tracker.ids().len(), 2);
    }

    #[test]
    fn test_lifecycle() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        assert!(matches!(
            tracker.assign_variant(&id, "u1"),
            Err(LearningError::NotRunning { .. })
        ));
        assert!(tracker.stop(&id).is_err());

        tracker.start(&id).unwrap();
        assert!(tracker.start(&id).is_err());
        tracker.stop(&id).unwrap();
        assert_eq!(tracker.get(&id).unwrap().status, ExperimentStatus::Stopped);
        assert!(matches!(
            tracker.complete(&id, "control"),
            Err(LearningError::InvalidTransition { .. })
        ));
        assert!(matches!(
            tracker.get("ghost"),
            Err(LearningError::UnknownExperiment(_))
        ));
    }

    #[test]
    fn test_assignment_is_stable() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();

        let first = tracker.assign_variant(&id, "user-42").unwrap();
        for _ in 0..100 {
            assert_eq!(tracker.assign_variant(&id, "user-42").unwrap(), first);
        }

        // A second tracker with an empty cache agrees.
        let point = assignment_point(&id, "user-42");
        let index = select_variant(point, &[0.5, 0.5]).unwrap();
        assert_eq!(variants()[index].0, first);
    }

    #[test]
    fn test_stopped_experiment_refuses_cached_subjects() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();
        tracker.assign_variant(&id, "u1").unwrap();
        tracker.stop(&id).unwrap();

        assert!(matches!(
            tracker.assign_variant(&id, "u1"),
            Err(LearningError::NotRunning {
                status: ExperimentStatus::Stopped,
                ..
            })
        ));
        assert!(tracker.config_for(&id, "u1").is_err());
    }

    #[test]
    fn test_completed_experiment_refuses_cached_subjects() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();
        tracker.assign_variant(&id, "u1").unwrap();
        tracker.complete(&id, "control").unwrap();

        assert!(matches!(
            tracker.assign_variant(&id, "u1"),
            Err(LearningError::NotRunning { .. })
        ));
    }

    #[test]
    fn test_start_keeps_existing_scope_versions() {
        let (store, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        let scope = variant_scope(&id, "treatment");
        let mut preset = variants()[1].1.clone();
        preset.retrieval.alpha.set_value(0.85);
        store.save(preset, Some(&scope), BTreeMap::new()).unwrap();

        tracker.start(&id).unwrap();
        assert_eq!(store.history(Some(&scope)).unwrap().len(), 1);
        assert_eq!(store.get_config(Some(&scope)).unwrap().retrieval.alpha.current(), 0.85);
        assert_eq!(
            store.history(Some(&variant_scope(&id, "control"))).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_failed_seeding_leaves_experiment_draft() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.experiments.get_mut(&id).unwrap().variants[1]
            .config
            .retrieval
            .alpha
            .default = 5.0;

        assert!(matches!(tracker.start(&id), Err(LearningError::Weights(_))));
        assert_eq!(tracker.get(&id).unwrap().status, ExperimentStatus::Draft);

        tracker.experiments.get_mut(&id).unwrap().variants[1].config = variants()[1].1.clone();
        tracker.start(&id).unwrap();
        assert_eq!(tracker.get(&id).unwrap().status, ExperimentStatus::Running);
    }

    #[test]
    fn test_variant_names_must_form_scopes() {
        let (_, tracker) = tracker();
        let mut named = variants();
        named[1].0 = "treat\0ment".to_string();
        assert!(matches!(
            tracker.create("x", named, &[0.5, 0.5]),
            Err(LearningError::Allocation(_))
        ));

        let mut unnamed = variants();
        unnamed[0].0 = String::new();
        assert!(tracker.create("x", unnamed, &[0.5, 0.5]).is_err());
        assert!(tracker.ids().is_empty());
    }

    #[test]
    fn test_assignment_point_range() {
        for i in 0..1000 {
            let point = assignment_point("exp", &format!("subject-{}", i));
            assert!((0.0..1.0).contains(&point));
        }
        assert_eq!(assignment_point("exp", "a"), assignment_point("exp", "a"));
    }

    #[test]
    fn test_select_variant_intervals() {
        assert_eq!(select_variant(0.0, &[0.5, 0.5]), Some(0));
        assert_eq!(select_variant(0.4999, &[0.5, 0.5]), Some(0));
        assert_eq!(select_variant(0.5, &[0.5, 0.5]), Some(1));
        assert_eq!(select_variant(0.9999, &[0.3, 0.3, 0.3999999]), Some(2));
        assert_eq!(select_variant(0.5, &[0.0, 1.0]), Some(1));
        assert_eq!(select_variant(0.5, &[]), None);
    }

    #[test]
    fn test_assignment_distribution_follows_allocation() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.7, 0.3]).unwrap();
        tracker.start(&id).unwrap();

        let n = 10_000;
        let control = (0..n)
            .filter(|i| tracker.assign_variant(&id, &format!("user-{}", i)).unwrap() == "control")
            .count();
        let share = control as f64 / n as f64;
        assert!((share - 0.7).abs() < 0.03, "control share {}", share);
    }

    #[test]
    fn test_record_outcome_requires_known_variant() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        assert!(tracker.record_outcome(&id, "control", 1.0).is_err());
        tracker.start(&id).unwrap();
        tracker.record_outcome(&id, "control", 1.0).unwrap();
        assert!(matches!(
            tracker.record_outcome(&id, "other", 1.0),
            Err(LearningError::UnknownVariant { .. })
        ));
        assert!(matches!(
            tracker.record_outcome(&id, "control", f64::NAN),
            Err(LearningError::InvalidOutcome(_))
        ));
    }

    #[test]
    fn test_analysis_requires_samples_and_improvement() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();

        for _ in 0..3 {
            tracker.record_outcome(&id, "control", 0.60).unwrap();
        }
        tracker.record_outcome(&id, "treatment", 0.70).unwrap();
        let analysis = tracker.analyze(&id).unwrap();
        assert!(!analysis.sufficient_samples);
        assert_eq!(analysis.winner, None);
        assert_eq!(analysis.p_value, None);

        tracker.record_outcome(&id, "treatment", 0.70).unwrap();
        tracker.record_outcome(&id, "treatment", 0.70).unwrap();
        let analysis = tracker.analyze(&id).unwrap();
        assert!(analysis.sufficient_samples);
        assert!(analysis.significant);
        assert_eq!(analysis.winner.as_deref(), Some("treatment"));
        assert!((analysis.relative_improvement.unwrap() - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_improvement_is_not_significant() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();
        for _ in 0..3 {
            tracker.record_outcome(&id, "control", 1.00).unwrap();
            tracker.record_outcome(&id, "treatment", 1.02).unwrap();
        }
        let analysis = tracker.analyze(&id).unwrap();
        assert!(!analysis.significant);
        assert_eq!(analysis.best.as_deref(), Some("treatment"));
    }

    #[test]
    fn test_zero_control_mean_has_no_relative_improvement() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();
        for _ in 0..3 {
            tracker.record_outcome(&id, "control", 0.0).unwrap();
            tracker.record_outcome(&id, "treatment", 0.5).unwrap();
        }
        let analysis = tracker.analyze(&id).unwrap();
        assert!(analysis.sufficient_samples);
        assert_eq!(analysis.best.as_deref(), Some("treatment"));
        assert_eq!(analysis.relative_improvement, None);
        assert!(!analysis.significant);
        assert_eq!(analysis.winner, None);
    }

    #[test]
    fn test_complete_promotes_winner_scope() {
        let (store, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.5, 0.5]).unwrap();
        tracker.start(&id).unwrap();

        let scope = variant_scope(&id, "treatment");
        assert_eq!(store.get_config(Some(&scope)).unwrap().retrieval.alpha.current(), 0.8);
        let mut refined = (*store.get_config(Some(&scope)).unwrap()).clone();
        refined.retrieval.alpha.set_value(0.85);
        store.save(refined, Some(&scope), BTreeMap::new()).unwrap();

        let version = tracker.complete(&id, "treatment").unwrap();
        assert_eq!(version.revision, 1);
        assert_eq!(store.get_config(None).unwrap().retrieval.alpha.current(), 0.85);

        let experiment = tracker.get(&id).unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Completed);
        assert_eq!(experiment.winner.as_deref(), Some("treatment"));
        assert!(tracker.complete(&id, "treatment").is_err());
    }

    #[test]
    fn test_config_for_subject() {
        let (_, tracker) = tracker();
        let id = tracker.create("x", variants(), &[0.0, 1.0]).unwrap();
        tracker.start(&id).unwrap();
        let (scope, config) = tracker.config_for(&id, "anyone").unwrap();
        assert_eq!(scope, variant_scope(&id, "treatment"));
        assert_eq!(config.retrieval.alpha.current(), 0.8);
    }

    proptest! {
        /// Property: ratios accepted iff they sum to 1 within tolerance.
        #[test]
        fn prop_allocation_sum(a in 0.0f64..1.0, b in 0.0f64..1.0) {
            let accepted = validate_allocation(&variants(), &[a, b], 1e-6).is_ok();
            prop_assert_eq!(accepted, ((a + b) - 1.0).abs() <= 1e-6);
        }

        /// Property: every point selects an in-range variant.
        #[test]
        fn prop_select_in_range(point in 0.0f64..1.0, split in 0.0f64..1.0) {
            let index = select_variant(point, &[split, 1.0 - split]).unwrap();
            prop_assert!(index < 2);
        }
    }
}
