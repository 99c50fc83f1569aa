//! # RLCF Integration Tests
//!
//! End-to-end tests driving the feedback pipeline across all components.
//!
//! ## Coverage
//!
//! | Behavior | Component | Test |
//! |----------|-----------|------|
//! | Weighted consensus | Council | `test_weighted_consensus_scenario` |
//! | Homogeneous population | Bias | `test_same_field_population_bias` |
//! | Empty aggregation | Pipeline | `test_no_feedback_keeps_status` |
//! | Rejected feedback | Authority | `test_rejected_feedback_leaves_authority` |
//! | Authority feedback loop | Authority | `test_authority_follows_agreement` |
//! | Confirmation history | Bias | `test_confirmation_across_tasks` |
//! | Learning from the pipeline | Learner | `test_learning_publishes_runtime_override` |
//! | Experiment scopes | Tracker | `test_experiment_scoped_weights` |
//! | Persistence | Store | `test_persisted_weights_reload` |
//! | Parallel aggregation | Pipeline | `test_concurrent_aggregation` |

use rlcf_core::{
    BiasDimension, ConfigSource, Credential, FeedbackPipeline, FeedbackSignal, RlcfConfig,
    RlcfError, RuntimeWeights, StorageConfig, TaskStatus, TaskType, WeightConfig,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tempfile::TempDir;

/// Creates a pipeline on a temporary store with its own runtime weights.
fn test_pipeline() -> FeedbackPipeline {
    let config = RlcfConfig {
        storage: StorageConfig::temporary(),
        ..Default::default()
    };
    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    FeedbackPipeline::with_runtime(config, runtime).unwrap()
}

fn nli(label: &str) -> Map<String, Value> {
    json!({ "label": label }).as_object().cloned().unwrap()
}

/// Pins an evaluator's authority.
fn set_authority(pipeline: &FeedbackPipeline, id: &str, authority: f64) {
    pipeline
        .registry()
        .update(id, |e| e.authority_score = authority)
        .unwrap();
}

/// Creates an NLI task in blind evaluation; returns task and response ids.
fn nli_task(pipeline: &FeedbackPipeline) -> (String, String) {
    let task = pipeline
        .create_task(
            TaskType::Nli,
            json!({ "premise": "The lease ended.", "hypothesis": "The tenant left." }),
            None,
        )
        .unwrap();
    let response = pipeline.add_response(&task.id, json!("neutral")).unwrap();
    pipeline.start_evaluation(&task.id).unwrap();
    (task.id, response.id)
}

// =============================================================================
// CONSENSUS AND BIAS SCENARIOS
// =============================================================================

#[test]
fn test_weighted_consensus_scenario() {
    let pipeline = test_pipeline();
    for (id, authority) in [("e1", 0.9), ("e2", 0.6), ("e3", 0.5)] {
        pipeline.register_evaluator(id, Vec::new()).unwrap();
        set_authority(&pipeline, id, authority);
    }

    let (task_id, response_id) = nli_task(&pipeline);
    for (id, label) in [("e1", "entailment"), ("e2", "contradiction"), ("e3", "entailment")] {
        pipeline
            .submit_feedback(&task_id, id, &response_id, TaskType::Nli, &nli(label))
            .unwrap();
    }

    let outcome = pipeline.trigger_aggregation(&task_id).unwrap();
    assert!(outcome.is_complete(), "failed: {:?}", outcome.failed_stages());

    let consensus = outcome.consensus.value().unwrap();
    assert_eq!(consensus.primary_value().unwrap().key(), "entailment");
    assert!((consensus.confidence - 0.7).abs() < 1e-9);
    assert!((consensus.total_weight - 2.0).abs() < 1e-9);
    assert_eq!(consensus.participant_count, 3);

    let scores = outcome.scoring.value().unwrap();
    assert_eq!(scores.len(), 3);
    let dissent = scores.iter().find(|s| s.evaluator_id == "e2").unwrap();
    assert_eq!(dissent.consistency, 0.0);
    assert!(scores
        .iter()
        .filter(|s| s.evaluator_id != "e2")
        .all(|s| s.consistency == 1.0));
}

#[test]
fn test_same_field_population_bias() {
    let pipeline = test_pipeline();
    let (task_id, response_id) = nli_task(&pipeline);

    for i in 0..5 {
        let id = format!("lawyer-{}", i);
        pipeline
            .register_evaluator(
                &id,
                vec![
                    Credential::text("professional_field", "Civil Law"),
                    Credential::number("professional_experience", 4.0),
                ],
            )
            .unwrap();
        pipeline
            .submit_feedback(&task_id, &id, &response_id, TaskType::Nli, &nli("entailment"))
            .unwrap();
    }

    let outcome = pipeline.trigger_aggregation(&task_id).unwrap();
    let analysis = outcome.bias.value().unwrap();

    assert!((analysis.score(BiasDimension::Demographic) - 1.0).abs() < 1e-9);
    assert!((analysis.score(BiasDimension::Geographic) - 1.0).abs() < 1e-9);
    for score in analysis.per_evaluator[&BiasDimension::ProfessionalClustering].values() {
        assert_eq!(*score, 0.0);
    }
    assert_eq!(analysis.sample_count, 5);
    assert_eq!(pipeline.bias_analysis(&task_id).unwrap().as_ref(), Some(analysis));
}

#[test]
fn test_confirmation_across_tasks() {
    let pipeline = test_pipeline();
    pipeline.register_evaluator("stubborn", Vec::new()).unwrap();

    for _ in 0..3 {
        let (task_id, response_id) = nli_task(&pipeline);
        pipeline
            .submit_feedback(&task_id, "stubborn", &response_id, TaskType::Nli, &nli("neutral"))
            .unwrap();
        pipeline.trigger_aggregation(&task_id).unwrap();
    }

    let (task_id, response_id) = nli_task(&pipeline);
    pipeline
        .submit_feedback(&task_id, "stubborn", &response_id, TaskType::Nli, &nli("neutral"))
        .unwrap();
    let outcome = pipeline.trigger_aggregation(&task_id).unwrap();
    let analysis = outcome.bias.value().unwrap();
    assert!(analysis.score(BiasDimension::Confirmation) > 0.0);
}

// =============================================================================
// FAILURE BEHAVIOR
// =============================================================================

#[test]
fn test_no_feedback_keeps_status() {
    let pipeline = test_pipeline();
    let (task_id, _) = nli_task(&pipeline);

    let err = pipeline.trigger_aggregation(&task_id).unwrap_err();
    assert!(err.is_no_feedback());
    assert_eq!(
        pipeline.task(&task_id).unwrap().status,
        TaskStatus::BlindEvaluation
    );
    assert!(pipeline.consensus(&task_id).unwrap().is_none());
}

#[test]
fn test_rejected_feedback_leaves_authority() {
    let pipeline = test_pipeline();
    let before = pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let (task_id, response_id) = nli_task(&pipeline);

    let bad = json!({ "label": "maybe" }).as_object().cloned().unwrap();
    let err = pipeline
        .submit_feedback(&task_id, "e1", &response_id, TaskType::Nli, &bad)
        .unwrap_err();
    assert!(err.is_validation());

    let missing = Map::new();
    assert!(pipeline
        .submit_feedback(&task_id, "e1", &response_id, TaskType::Nli, &missing)
        .unwrap_err()
        .is_validation());

    let after = pipeline.evaluator("e1").unwrap();
    assert_eq!(after.authority_score, before.authority_score);
    assert_eq!(after.track_record_score, before.track_record_score);
    assert!(pipeline.feedback(&task_id).unwrap().is_empty());
}

#[test]
fn test_aggregating_twice_is_rejected() {
    let pipeline = test_pipeline();
    pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let (task_id, response_id) = nli_task(&pipeline);
    pipeline
        .submit_feedback(&task_id, "e1", &response_id, TaskType::Nli, &nli("neutral"))
        .unwrap();

    pipeline.trigger_aggregation(&task_id).unwrap();
    assert!(matches!(
        pipeline.trigger_aggregation(&task_id),
        Err(RlcfError::Council(_))
    ));
}

// =============================================================================
// FEEDBACK LOOP
// =============================================================================

#[test]
fn test_authority_follows_agreement() {
    let pipeline = test_pipeline();
    for id in ["a", "b", "c"] {
        pipeline.register_evaluator(id, Vec::new()).unwrap();
    }
    let start = pipeline.evaluator("c").unwrap().authority_score;

    for _ in 0..5 {
        let (task_id, response_id) = nli_task(&pipeline);
        for (id, label) in [("a", "entailment"), ("b", "entailment"), ("c", "contradiction")] {
            pipeline
                .submit_feedback(&task_id, id, &response_id, TaskType::Nli, &nli(label))
                .unwrap();
        }
        pipeline.trigger_aggregation(&task_id).unwrap();
    }

    let agreeing = pipeline.evaluator("a").unwrap();
    let dissenting = pipeline.evaluator("c").unwrap();
    assert!(dissenting.authority_score < start);
    assert!(agreeing.authority_score > dissenting.authority_score);
    assert!(agreeing.track_record_score > dissenting.track_record_score);
}

#[test]
fn test_learning_publishes_runtime_override() {
    let pipeline = test_pipeline();
    let signal = FeedbackSignal::Gating {
        expert: "literal".to_string(),
        reward: 1.0,
        authority: 0.8,
    };

    let outcome = pipeline.learn(&signal, None).unwrap();
    assert!(outcome.is_applied());

    let resolved = pipeline.store().resolve(None).unwrap();
    assert_eq!(resolved.source, ConfigSource::RuntimeOverride);
    let prior = &resolved.config.gating.expert_priors["literal"];
    assert!(prior.current() > prior.default);
}

#[test]
fn test_experiment_scoped_weights() {
    let pipeline = test_pipeline();
    let mut treatment = WeightConfig::default();
    treatment.retrieval.alpha.set_value(0.6);

    let experiments = pipeline.experiments();
    let id = experiments
        .create(
            "retrieval alpha",
            vec![
                ("control".to_string(), WeightConfig::default()),
                ("treatment".to_string(), treatment),
            ],
            &[0.5, 0.5],
        )
        .unwrap();
    experiments.start(&id).unwrap();

    let (scope, config) = experiments.config_for(&id, "user-42").unwrap();
    let again = experiments.config_for(&id, "user-42").unwrap();
    assert_eq!(scope, again.0);
    assert_eq!(pipeline.weights(Some(&scope)).unwrap(), config);

    // The default scope is untouched.
    assert_eq!(
        pipeline.weights(None).unwrap().retrieval.alpha.current(),
        WeightConfig::default().retrieval.alpha.current()
    );
}

#[test]
fn test_persisted_weights_reload() {
    let temp_dir = TempDir::new().unwrap();
    let config = RlcfConfig {
        storage: StorageConfig::at(temp_dir.path().join("weights.db")),
        ..Default::default()
    };

    {
        let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
        let pipeline = FeedbackPipeline::with_runtime(config.clone(), runtime).unwrap();
        let mut tuned = WeightConfig::default();
        tuned.retrieval.alpha.set_value(0.45);
        pipeline
            .store()
            .save(tuned, None, Default::default())
            .unwrap();
        pipeline.store().flush().unwrap();
    }

    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    let pipeline = FeedbackPipeline::with_runtime(config, runtime).unwrap();
    let resolved = pipeline.store().resolve(None).unwrap();
    assert_eq!(resolved.source, ConfigSource::PersistedDefault);
    assert_eq!(resolved.config.retrieval.alpha.current(), 0.45);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_aggregation() {
    let pipeline = Arc::new(test_pipeline());
    let evaluators = ["a", "b", "c"];
    for id in evaluators {
        pipeline.register_evaluator(id, Vec::new()).unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let (task_id, response_id) = nli_task(&pipeline);
        for id in evaluators {
            pipeline
                .submit_feedback(&task_id, id, &response_id, TaskType::Nli, &nli("entailment"))
                .unwrap();
        }
        tasks.push(task_id);
    }

    let handles: Vec<_> = tasks
        .iter()
        .cloned()
        .map(|task_id| {
            let pipeline = pipeline.clone();
            tokio::task::spawn_blocking(move || pipeline.trigger_aggregation(&task_id))
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_complete(), "failed: {:?}", outcome.failed_stages());
    }

    for task_id in &tasks {
        assert_eq!(pipeline.task(task_id).unwrap().status, TaskStatus::Aggregated);
    }

    // Every evaluator agreed eight times; no update may be lost.
    let reference = pipeline.evaluator("a").unwrap();
    for id in evaluators {
        let evaluator = pipeline.evaluator(id).unwrap();
        assert_eq!(evaluator.revision, 8);
        assert!((evaluator.track_record_score - reference.track_record_score).abs() < 1e-12);
        assert!(evaluator.track_record_score > 0.5);
    }
}
