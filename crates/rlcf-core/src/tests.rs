//! Unit tests for rlcf-core.

use crate::{FeedbackPipeline, MemoryAuditSink, RlcfConfig, RlcfError, StorageConfig};
use rlcf_council::{Credential, CouncilError, TaskStatus, TaskType};
use rlcf_weights::{RuntimeWeights, WeightConfig};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn pipeline() -> FeedbackPipeline {
    let config = RlcfConfig {
        storage: StorageConfig::temporary(),
        ..Default::default()
    };
    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    FeedbackPipeline::with_runtime(config, runtime).unwrap()
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// An NLI task in blind evaluation with one response.
fn open_nli(pipeline: &FeedbackPipeline) -> (String, String) {
    let task = pipeline
        .create_task(TaskType::Nli, json!({"premise": "p", "hypothesis": "h"}), None)
        .unwrap();
    let response = pipeline.add_response(&task.id, json!("entailment")).unwrap();
    pipeline.start_evaluation(&task.id).unwrap();
    (task.id, response.id)
}

#[test]
fn test_crate_structure() {
    use crate::{AggregationOutcome, StageOutcome};

    let _config = RlcfConfig::default();
    let _stage: StageOutcome<()> = StageOutcome::skipped("none");
    let _outcome: Option<AggregationOutcome> = None;
}

#[test]
fn test_register_evaluator_sets_initial_authority() {
    let pipeline = pipeline();
    let evaluator = pipeline
        .register_evaluator(
            "e1",
            vec![Credential::number("professional_experience", 12.0)],
        )
        .unwrap();

    assert!(evaluator.baseline_credential_score > 0.0);
    assert!(evaluator.authority_score > 0.0);
    assert!(evaluator.authority_score <= 1.0);

    // Re-registering keeps the stored evaluator.
    let again = pipeline.register_evaluator("e1", Vec::new()).unwrap();
    assert_eq!(again.authority_score, evaluator.authority_score);
}

#[test]
fn test_task_lifecycle() {
    let pipeline = pipeline();
    pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let (task_id, response_id) = open_nli(&pipeline);
    assert_eq!(
        pipeline.task(&task_id).unwrap().status,
        TaskStatus::BlindEvaluation
    );

    pipeline
        .submit_feedback(
            &task_id,
            "e1",
            &response_id,
            TaskType::Nli,
            &fields(json!({"label": "entailment"})),
        )
        .unwrap();

    let outcome = pipeline.trigger_aggregation(&task_id).unwrap();
    assert!(outcome.is_complete());
    assert_eq!(pipeline.task(&task_id).unwrap().status, TaskStatus::Aggregated);
    assert!(pipeline.consensus(&task_id).unwrap().is_some());
    assert!(pipeline.bias_analysis(&task_id).unwrap().is_some());

    let entry = &pipeline.feedback(&task_id).unwrap()[0];
    assert_eq!(entry.consistency_score, Some(1.0));
    assert_eq!(entry.correctness_score, None);

    pipeline.close_task(&task_id).unwrap();
    assert_eq!(pipeline.task(&task_id).unwrap().status, TaskStatus::Closed);
}

#[test]
fn test_feedback_outside_blind_evaluation() {
    let pipeline = pipeline();
    pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let task = pipeline
        .create_task(TaskType::Nli, json!({}), None)
        .unwrap();
    let response = pipeline.add_response(&task.id, json!("x")).unwrap();

    let err = pipeline
        .submit_feedback(
            &task.id,
            "e1",
            &response.id,
            TaskType::Nli,
            &fields(json!({"label": "neutral"})),
        )
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_submission_rejections() {
    let pipeline = pipeline();
    pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let (task_id, response_id) = open_nli(&pipeline);
    let label = fields(json!({"label": "neutral"}));

    assert!(matches!(
        pipeline.submit_feedback(&task_id, "ghost", &response_id, TaskType::Nli, &label),
        Err(RlcfError::Council(CouncilError::UnknownEvaluator(_)))
    ));
    assert!(matches!(
        pipeline.submit_feedback("missing", "e1", &response_id, TaskType::Nli, &label),
        Err(RlcfError::UnknownTask(_))
    ));
    assert!(matches!(
        pipeline.submit_feedback(&task_id, "e1", "missing", TaskType::Nli, &label),
        Err(RlcfError::UnknownResponse { .. })
    ));
    assert!(matches!(
        pipeline.submit_feedback(
            &task_id,
            "e1",
            &response_id,
            TaskType::Prediction,
            &fields(json!({"outcome": "granted", "confidence": 0.5})),
        ),
        Err(RlcfError::Council(CouncilError::MixedTaskTypes { .. }))
    ));

    pipeline
        .submit_feedback(&task_id, "e1", &response_id, TaskType::Nli, &label)
        .unwrap();
    let duplicate = pipeline
        .submit_feedback(&task_id, "e1", &response_id, TaskType::Nli, &label)
        .unwrap_err();
    assert!(duplicate.is_validation());
    assert_eq!(pipeline.feedback(&task_id).unwrap().len(), 1);
}

#[test]
fn test_ground_truth_type_must_match() {
    let pipeline = pipeline();
    let truth = rlcf_council::FeedbackPayload::Prediction {
        outcome: "granted".to_string(),
        confidence: 1.0,
    };
    let err = pipeline
        .create_task(TaskType::Nli, json!({}), Some(truth))
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_correctness_against_ground_truth() {
    let pipeline = pipeline();
    pipeline.register_evaluator("right", Vec::new()).unwrap();
    pipeline.register_evaluator("wrong", Vec::new()).unwrap();

    let truth = rlcf_council::FeedbackPayload::Nli {
        label: rlcf_council::NliLabel::Entailment,
        confidence: 1.0,
    };
    let task = pipeline
        .create_task(TaskType::Nli, json!({}), Some(truth))
        .unwrap();
    let response = pipeline.add_response(&task.id, json!("r")).unwrap();
    pipeline.start_evaluation(&task.id).unwrap();

    for (evaluator, label) in [("right", "entailment"), ("wrong", "contradiction")] {
        pipeline
            .submit_feedback(
                &task.id,
                evaluator,
                &response.id,
                TaskType::Nli,
                &fields(json!({"label": label})),
            )
            .unwrap();
    }
    let outcome = pipeline.trigger_aggregation(&task.id).unwrap();
    let scores = outcome.scoring.value().unwrap();

    let right = scores.iter().find(|s| s.evaluator_id == "right").unwrap();
    let wrong = scores.iter().find(|s| s.evaluator_id == "wrong").unwrap();
    assert_eq!(right.correctness, Some(1.0));
    assert_eq!(wrong.correctness, Some(0.0));
}

#[test]
fn test_audit_sink_receives_records() {
    let sink = Arc::new(MemoryAuditSink::new());
    let pipeline = pipeline().with_audit_sink(sink.clone());
    pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let (task_id, response_id) = open_nli(&pipeline);
    pipeline
        .submit_feedback(
            &task_id,
            "e1",
            &response_id,
            TaskType::Nli,
            &fields(json!({"label": "neutral"})),
        )
        .unwrap();
    pipeline.trigger_aggregation(&task_id).unwrap();

    let consensus = sink.consensus_records();
    assert_eq!(consensus.len(), 1);
    assert_eq!(consensus[0].0, task_id);
    assert!(sink.bias_reports().iter().any(|r| r.dimension == "total"));
}

#[test]
fn test_audit_logging_disabled() {
    let mut config = RlcfConfig {
        storage: StorageConfig::temporary(),
        ..Default::default()
    };
    config.global.audit_logging = false;
    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    let sink = Arc::new(MemoryAuditSink::new());
    let pipeline = FeedbackPipeline::with_runtime(config, runtime)
        .unwrap()
        .with_audit_sink(sink.clone());

    pipeline.register_evaluator("e1", Vec::new()).unwrap();
    let (task_id, response_id) = open_nli(&pipeline);
    pipeline
        .submit_feedback(
            &task_id,
            "e1",
            &response_id,
            TaskType::Nli,
            &fields(json!({"label": "neutral"})),
        )
        .unwrap();
    pipeline.trigger_aggregation(&task_id).unwrap();

    assert!(sink.consensus_records().is_empty());
    assert!(sink.bias_reports().is_empty());
}

#[test]
fn test_enforced_weight_sum_rejects_reload() {
    let mut config = RlcfConfig {
        storage: StorageConfig::temporary(),
        ..Default::default()
    };
    config.global.enforce_authority_weight_sum = true;
    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    let pipeline = FeedbackPipeline::with_runtime(config, runtime).unwrap();

    let mut skewed = WeightConfig::default();
    skewed.rlcf.recent_performance.set_value(0.3);
    assert!(matches!(
        pipeline.reload_weights(skewed),
        Err(RlcfError::Weights(_))
    ));
    assert!(pipeline.reload_weights(WeightConfig::default()).is_ok());
}

#[test]
fn test_enforced_weight_sum_rejects_construction() {
    let mut skewed = WeightConfig::default();
    skewed.rlcf.recent_performance.set_value(0.3);

    let lenient = RlcfConfig {
        storage: StorageConfig::temporary(),
        ..Default::default()
    };
    let mut strict = lenient.clone();
    strict.global.enforce_authority_weight_sum = true;

    let runtime = Arc::new(RuntimeWeights::new(skewed.clone()).unwrap());
    assert!(matches!(
        FeedbackPipeline::with_runtime(strict.clone(), runtime),
        Err(RlcfError::Weights(_))
    ));

    let runtime = Arc::new(RuntimeWeights::new(skewed).unwrap());
    assert!(FeedbackPipeline::with_runtime(lenient, runtime).is_ok());

    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    assert!(FeedbackPipeline::with_runtime(strict, runtime).is_ok());
}
