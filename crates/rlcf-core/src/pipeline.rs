//! The feedback pipeline facade.
//!
//! [`FeedbackPipeline`] owns the task lifecycle and runs the per-task
//! aggregation stages:
//!
//! 1. **Consensus**: authority-weighted aggregation; commits the consensus
//!    and moves the task to `aggregated`.
//! 2. **Scoring**: consistency and correctness per entry, then a
//!    track-record and authority update per evaluator.
//! 3. **Bias**: six-dimension audit of the feedback population.
//!
//! Each stage commits on its own. A failing stage is reported in the
//! [`AggregationOutcome`] and logged; stages already committed stay
//! committed.

use crate::{
    audit::{AuditSink, TracingAuditSink},
    config::RlcfConfig,
    error::RlcfError,
    outcome::{AggregationOutcome, EntryScore, StageOutcome},
    Result,
};

use rlcf_council::{
    AuthorityModel, BiasAnalysis, BiasDetector, BiasSample, ConsensusAggregator, ConsensusResult,
    ConsistencyCorrectnessScorer, CouncilError, Credential, Evaluator, EvaluatorRegistry,
    FeedbackEntry, FeedbackPayload, FeedbackRatings, Response, Task, TaskStatus, TaskType,
    WeightedFeedback,
};
use rlcf_learning::{ExperimentTracker, FeedbackSignal, LearningOutcome, WeightLearner};
use rlcf_weights::{RuntimeWeights, Storage, WeightConfig, WeightStore};

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the pipeline holds for one task.
#[derive(Debug, Clone)]
struct TaskRecord {
    task: Task,
    responses: BTreeMap<String, Response>,
    entries: Vec<FeedbackEntry>,
    consensus: Option<ConsensusResult>,
    bias: Option<BiasAnalysis>,
}

/// The RLCF feedback pipeline.
///
/// # Concurrency
///
/// All operations take `&self`; many tasks can be aggregated at once.
/// Evaluator authority updates are serialized per evaluator by the
/// [`EvaluatorRegistry`].
///
/// # Example
///
/// ```rust
/// use rlcf_core::{FeedbackPipeline, RlcfConfig, StorageConfig};
/// use rlcf_council::TaskType;
/// use rlcf_weights::{RuntimeWeights, WeightConfig};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let config = RlcfConfig { storage: StorageConfig::temporary(), ..Default::default() };
/// let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default())?);
/// let pipeline = FeedbackPipeline::with_runtime(config, runtime)?;
///
/// pipeline.register_evaluator("e1", Vec::new())?;
/// let task = pipeline.create_task(TaskType::Nli, json!({"premise": "p", "hypothesis": "h"}), None)?;
/// let response = pipeline.add_response(&task.id, json!("entailment"))?;
/// pipeline.start_evaluation(&task.id)?;
///
/// let fields = json!({"label": "entailment"});
/// pipeline.submit_feedback(&task.id, "e1", &response.id, TaskType::Nli, fields.as_object().unwrap())?;
///
/// let outcome = pipeline.trigger_aggregation(&task.id)?;
/// assert!(outcome.is_complete());
/// # Ok::<(), rlcf_core::RlcfError>(())
/// ```
pub struct FeedbackPipeline {
    /// Configuration.
    config: RlcfConfig,

    /// Weight resolution and persistence.
    store: Arc<WeightStore>,

    /// Evaluators, locked per evaluator.
    registry: EvaluatorRegistry,

    /// Credential and authority scoring.
    authority: AuthorityModel,

    /// Per-task-type consensus.
    aggregator: ConsensusAggregator,

    /// Consistency and correctness scoring.
    scorer: ConsistencyCorrectnessScorer,

    /// Bias audit.
    bias: BiasDetector,

    /// Weight learning.
    learner: WeightLearner,

    /// A/B experiments.
    experiments: ExperimentTracker,

    /// Tasks with their responses and feedback.
    tasks: DashMap<String, TaskRecord>,

    /// Earlier positions per evaluator, for confirmation bias.
    positions: DashMap<String, Vec<(TaskType, String)>>,

    /// Outbound audit records.
    audit: Arc<dyn AuditSink>,
}

impl FeedbackPipeline {
    /// Creates a pipeline on the process-wide runtime weights.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The weight database cannot be opened
    /// - The effective weights violate an enforced authority weight sum
    pub fn new(config: RlcfConfig) -> Result<Self> {
        Self::with_runtime(config, rlcf_weights::runtime::global())
    }

    /// Creates a pipeline resolving weights through `runtime`.
    pub fn with_runtime(config: RlcfConfig, runtime: Arc<RuntimeWeights>) -> Result<Self> {
        config.validate()?;

        let store = if config.storage.temporary {
            WeightStore::with_storage(Storage::temporary()?, runtime)
        } else {
            WeightStore::open(&config.storage.db_path, runtime)?
        };
        let store = Arc::new(store);
        config.check_weights(&*store.get_config(None)?)?;

        let pipeline = Self {
            registry: EvaluatorRegistry::new(),
            authority: AuthorityModel::new(config.authority.clone()),
            aggregator: ConsensusAggregator::new(config.aggregation.clone()),
            scorer: ConsistencyCorrectnessScorer::new(config.scoring.clone()),
            bias: BiasDetector::new(config.bias.clone()),
            learner: WeightLearner::new(store.clone(), config.learner.clone()),
            experiments: ExperimentTracker::new(store.clone(), config.experiments.clone()),
            tasks: DashMap::new(),
            positions: DashMap::new(),
            audit: Arc::new(TracingAuditSink),
            store,
            config,
        };

        info!(
            "Feedback pipeline initialized ({} storage)",
            if pipeline.config.storage.temporary {
                "temporary"
            } else {
                "persistent"
            }
        );
        Ok(pipeline)
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    // =========================================================================
    // Evaluators
    // =========================================================================

    /// Registers an evaluator and computes their initial authority.
    ///
    /// Registering an existing id returns the stored evaluator unchanged.
    pub fn register_evaluator(
        &self,
        id: &str,
        credentials: Vec<Credential>,
    ) -> Result<Evaluator> {
        if self.registry.contains(id) {
            debug!("Evaluator {} already registered", id);
            return Ok(self.registry.get(id)?);
        }

        let weights = self.store.get_config(None)?;
        let mut evaluator = Evaluator::new(id, credentials);
        self.authority.refresh_baseline(&mut evaluator);
        let prior = evaluator.track_record_score;
        self.authority
            .update_authority(&mut evaluator, prior, &weights.rlcf);

        if !self.registry.register(evaluator) {
            debug!("Evaluator {} registered concurrently", id);
        }
        Ok(self.registry.get(id)?)
    }

    /// Snapshot of an evaluator.
    pub fn evaluator(&self, id: &str) -> Result<Evaluator> {
        Ok(self.registry.get(id)?)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Creates an open task.
    ///
    /// # Errors
    ///
    /// `Validation` if the ground truth belongs to another task type or is
    /// itself invalid.
    pub fn create_task(
        &self,
        task_type: TaskType,
        input: Value,
        ground_truth: Option<FeedbackPayload>,
    ) -> Result<Task> {
        let mut task = Task::new(uuid::Uuid::new_v4().to_string(), task_type, input);
        if let Some(truth) = ground_truth {
            if truth.task_type() != task_type {
                return Err(CouncilError::Validation(format!(
                    "ground truth of type {} for a {} task",
                    truth.task_type(),
                    task_type
                ))
                .into());
            }
            truth.validate()?;
            task = task.with_ground_truth(truth);
        }

        self.tasks.insert(
            task.id.clone(),
            TaskRecord {
                task: task.clone(),
                responses: BTreeMap::new(),
                entries: Vec::new(),
                consensus: None,
                bias: None,
            },
        );
        info!("Created {} task {}", task_type, task.id);
        Ok(task)
    }

    /// Attaches a response to a task.
    pub fn add_response(&self, task_id: &str, content: Value) -> Result<Response> {
        let mut record = self.record_mut(task_id)?;
        let response = Response::new(uuid::Uuid::new_v4().to_string(), task_id, content);
        record
            .responses
            .insert(response.id.clone(), response.clone());
        Ok(response)
    }

    /// Opens the blind evaluation window.
    pub fn start_evaluation(&self, task_id: &str) -> Result<()> {
        let mut record = self.record_mut(task_id)?;
        record.task.transition(TaskStatus::BlindEvaluation)?;
        info!("Task {} open for blind evaluation", task_id);
        Ok(())
    }

    /// Closes an aggregated task.
    pub fn close_task(&self, task_id: &str) -> Result<()> {
        let mut record = self.record_mut(task_id)?;
        record.task.transition(TaskStatus::Closed)?;
        info!("Task {} closed", task_id);
        Ok(())
    }

    /// Snapshot of a task.
    pub fn task(&self, task_id: &str) -> Result<Task> {
        Ok(self.record(task_id)?.task.clone())
    }

    /// Feedback submitted for a task, in submission order.
    pub fn feedback(&self, task_id: &str) -> Result<Vec<FeedbackEntry>> {
        Ok(self.record(task_id)?.entries.clone())
    }

    /// Committed consensus of a task.
    pub fn consensus(&self, task_id: &str) -> Result<Option<ConsensusResult>> {
        Ok(self.record(task_id)?.consensus.clone())
    }

    /// Committed bias analysis of a task.
    pub fn bias_analysis(&self, task_id: &str) -> Result<Option<BiasAnalysis>> {
        Ok(self.record(task_id)?.bias.clone())
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    /// Validates and stores one evaluator's feedback.
    ///
    /// `fields` is the schema-validated payload map; the optional rating
    /// keys `helpfulness`, `accuracy` and `community_helpfulness` are read
    /// from it as well.
    ///
    /// # Errors
    ///
    /// - `Validation` for a missing or mistyped field, a task outside its
    ///   blind evaluation window, or a second submission by the same evaluator
    /// - `MixedTaskTypes` if `task_type` is not the task's type
    /// - `UnknownEvaluator`, `UnknownTask`, `UnknownResponse`
    ///
    /// A rejected submission leaves the evaluator's authority unchanged.
    pub fn submit_feedback(
        &self,
        task_id: &str,
        evaluator_id: &str,
        response_id: &str,
        task_type: TaskType,
        fields: &Map<String, Value>,
    ) -> Result<FeedbackEntry> {
        if !self.registry.contains(evaluator_id) {
            return Err(CouncilError::UnknownEvaluator(evaluator_id.to_string()).into());
        }
        let payload = FeedbackPayload::from_fields(task_type, fields)?;
        let ratings = FeedbackRatings::from_fields(fields)?;

        let mut record = self.record_mut(task_id)?;
        if !record.task.accepts_feedback() {
            return Err(CouncilError::Validation(format!(
                "task {} is {}, feedback is accepted only during blind evaluation",
                task_id, record.task.status
            ))
            .into());
        }
        if record.task.task_type != task_type {
            return Err(CouncilError::MixedTaskTypes {
                expected: record.task.task_type,
                found: task_type,
            }
            .into());
        }
        if !record.responses.contains_key(response_id) {
            return Err(RlcfError::UnknownResponse {
                task_id: task_id.to_string(),
                response_id: response_id.to_string(),
            });
        }
        if record.entries.iter().any(|e| e.evaluator_id == evaluator_id) {
            return Err(CouncilError::Validation(format!(
                "evaluator {} already submitted feedback for task {}",
                evaluator_id, task_id
            ))
            .into());
        }

        let entry = FeedbackEntry::new(task_id, evaluator_id, response_id, payload)
            .with_ratings(ratings);
        record.entries.push(entry.clone());
        debug!(
            "Feedback {} from {} on task {} ({} total)",
            entry.id,
            evaluator_id,
            task_id,
            record.entries.len()
        );
        Ok(entry)
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Runs consensus, scoring and bias detection for a task.
    ///
    /// # Errors
    ///
    /// - `NoFeedback` if the task has no entries; its status is unchanged
    /// - `InvalidTransition` if the task is not in blind evaluation
    ///
    /// Failures inside a stage are reported in the outcome instead.
    pub fn trigger_aggregation(&self, task_id: &str) -> Result<AggregationOutcome> {
        info!("Aggregating task {}", task_id);

        // Stage 1: consensus, computed and committed under the task lock
        let (consensus, task, entries) = {
            let mut record = self.record_mut(task_id)?;
            if record.task.status != TaskStatus::BlindEvaluation {
                return Err(CouncilError::InvalidTransition {
                    from: record.task.status,
                    to: TaskStatus::Aggregated,
                }
                .into());
            }
            if record.entries.is_empty() {
                warn!("Task {} has no feedback; status unchanged", task_id);
                return Err(CouncilError::NoFeedback(record.task.task_type).into());
            }

            let consensus = match self.compute_consensus(&record) {
                Ok(consensus) => {
                    record.task.transition(TaskStatus::Aggregated)?;
                    record.consensus = Some(consensus.clone());
                    StageOutcome::committed(consensus)
                }
                Err(e) => {
                    warn!("Consensus stage failed for {}: {}", task_id, e);
                    StageOutcome::failed(e)
                }
            };
            (consensus, record.task.clone(), record.entries.clone())
        };

        if let Some(result) = consensus.value() {
            if self.config.global.audit_logging {
                if let Err(e) = self.audit.record_consensus(task_id, result) {
                    warn!("Audit sink rejected consensus for {}: {}", task_id, e);
                }
            }
        }

        // Stage 2: scoring and authority
        let scoring = match consensus.value() {
            Some(result) => match self.score_entries(&task, &entries, result) {
                Ok(scores) => StageOutcome::committed(scores),
                Err(e) => {
                    warn!("Scoring stage failed for {}: {}", task_id, e);
                    StageOutcome::failed(e)
                }
            },
            None => StageOutcome::skipped("consensus stage did not commit"),
        };

        // Stage 3: bias
        let bias = match self.detect_bias(&task, &entries) {
            Ok(analysis) => StageOutcome::committed(analysis),
            Err(e) => {
                warn!("Bias stage failed for {}: {}", task_id, e);
                StageOutcome::failed(e)
            }
        };

        let outcome = AggregationOutcome {
            task_id: task_id.to_string(),
            consensus,
            scoring,
            bias,
            finished_at: chrono::Utc::now(),
        };
        info!(
            "Aggregation of {} finished; failed stages: {:?}",
            task_id,
            outcome.failed_stages()
        );
        Ok(outcome)
    }

    fn compute_consensus(&self, record: &TaskRecord) -> Result<ConsensusResult> {
        let weighted = record
            .entries
            .iter()
            .map(|entry| {
                let authority = self.registry.authority(&entry.evaluator_id)?;
                Ok(WeightedFeedback::from_entry(entry, authority))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self
            .aggregator
            .aggregate(record.task.task_type, &weighted)?)
    }

    fn score_entries(
        &self,
        task: &Task,
        entries: &[FeedbackEntry],
        consensus: &ConsensusResult,
    ) -> Result<Vec<EntryScore>> {
        let scored: Vec<FeedbackEntry> = entries
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                entry.consistency_score = Some(self.scorer.consistency(&entry.payload, consensus));
                entry.correctness_score = task
                    .ground_truth
                    .as_ref()
                    .map(|truth| self.scorer.correctness(&entry.payload, Some(truth)));
                entry
            })
            .collect();

        // Commit derived scores before touching authority.
        {
            let mut record = self.record_mut(&task.id)?;
            for entry in record.entries.iter_mut() {
                if let Some(scored) = scored.iter().find(|s| s.id == entry.id) {
                    entry.consistency_score = scored.consistency_score;
                    entry.correctness_score = scored.correctness_score;
                }
            }
        }

        let weights = self.store.get_config(None)?;
        let mut scores = Vec::with_capacity(scored.len());
        for entry in &scored {
            let quality = self.authority.quality_score(entry);
            let (before, after) = self.registry.update(&entry.evaluator_id, |evaluator| {
                let before = evaluator.authority_score;
                self.authority
                    .update_track_record(evaluator, quality, &weights.rlcf);
                let after = self
                    .authority
                    .update_authority(evaluator, quality, &weights.rlcf);
                (before, after)
            })?;
            debug!(
                "Authority of {} moved {:.4} -> {:.4}",
                entry.evaluator_id, before, after
            );
            scores.push(EntryScore {
                entry_id: entry.id.clone(),
                evaluator_id: entry.evaluator_id.clone(),
                consistency: entry.consistency_score.unwrap_or(0.0),
                correctness: entry.correctness_score,
                quality,
                authority_before: before,
                authority_after: after,
            });
        }
        Ok(scores)
    }

    fn detect_bias(&self, task: &Task, entries: &[FeedbackEntry]) -> Result<BiasAnalysis> {
        let samples = entries
            .iter()
            .map(|entry| {
                let evaluator = self.registry.get(&entry.evaluator_id)?;
                let prior_positions: Vec<String> = self
                    .positions
                    .get(&entry.evaluator_id)
                    .map(|history| {
                        history
                            .iter()
                            .filter(|(task_type, _)| *task_type == task.task_type)
                            .map(|(_, position)| position.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(BiasSample {
                    evaluator_id: entry.evaluator_id.clone(),
                    position: entry.payload.position_key(),
                    experience_years: evaluator.experience_years(),
                    professional_field: evaluator.professional_field(),
                    location: evaluator.location(),
                    prior_positions,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let analysis = self.bias.analyze(&task.id, &samples);

        self.record_mut(&task.id)?.bias = Some(analysis.clone());
        for sample in &samples {
            self.positions
                .entry(sample.evaluator_id.clone())
                .or_default()
                .push((task.task_type, sample.position.clone()));
        }

        if self.config.global.audit_logging {
            if let Err(e) = self.audit.record_bias(&analysis.reports()) {
                warn!("Audit sink rejected bias reports for {}: {}", task.id, e);
            }
        }
        Ok(analysis)
    }

    // =========================================================================
    // Weights and learning
    // =========================================================================

    /// The weight document in effect, optionally for an experiment scope.
    pub fn weights(&self, experiment_id: Option<&str>) -> Result<Arc<WeightConfig>> {
        Ok(self.store.get_config(experiment_id)?)
    }

    /// Installs a new static default, dropping any runtime override.
    pub fn init_weights(&self, config: WeightConfig) -> Result<u64> {
        self.config.check_weights(&config)?;
        Ok(self.store.runtime().init(config)?)
    }

    /// Installs a runtime override.
    pub fn reload_weights(&self, config: WeightConfig) -> Result<u64> {
        self.config.check_weights(&config)?;
        Ok(self.store.runtime().reload(config)?)
    }

    /// Feeds one learning signal to the learner.
    pub fn learn(
        &self,
        signal: &FeedbackSignal,
        experiment_id: Option<&str>,
    ) -> Result<LearningOutcome> {
        Ok(self
            .learner
            .update_from_feedback(signal.category(), signal, experiment_id)?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The configuration.
    pub fn config(&self) -> &RlcfConfig {
        &self.config
    }

    /// The weight store.
    pub fn store(&self) -> &Arc<WeightStore> {
        &self.store
    }

    /// The evaluator registry.
    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    /// The weight learner.
    pub fn learner(&self) -> &WeightLearner {
        &self.learner
    }

    /// The experiment tracker.
    pub fn experiments(&self) -> &ExperimentTracker {
        &self.experiments
    }

    fn record(&self, task_id: &str) -> Result<Ref<'_, String, TaskRecord>> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| RlcfError::UnknownTask(task_id.to_string()))
    }

    fn record_mut(&self, task_id: &str) -> Result<RefMut<'_, String, TaskRecord>> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| RlcfError::UnknownTask(task_id.to_string()))
    }
}

impl std::fmt::Debug for FeedbackPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackPipeline")
            .field("tasks", &self.tasks.len())
            .field("evaluators", &self.registry.len())
            .field("store", &self.store)
            .finish()
    }
}
