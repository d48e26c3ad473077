//! Pipeline execution tests: state sequencing, retries, deduplication and
//! the failure path

use crate::common::{
    generation_rows, object_event, raw_event, test_config, PipelineHarness, RecordingNotifier,
    ScriptedProcessingExecutor, MB,
};
use gridload_core::constants::events as system_events;
use gridload_core::error::GridloadError;
use gridload_core::events::NotificationKind;
use gridload_core::models::ProcessingPath;
use gridload_core::orchestration::ExecutionOutcome;
use gridload_core::state_machine::WorkflowState;
use gridload_core::store::{PointQuery, PointStore};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_small_csv_completes_through_inline_path() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(120), generation_rows(120));

    let summaries = harness
        .orchestrator
        .handle_event(&raw_event("generation/plants_2024.csv", 50 * 1024))
        .await;
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];

    assert!(summary.is_completed(), "{:?}", summary.outcome);
    assert_eq!(summary.final_state, WorkflowState::Complete);
    assert_eq!(summary.processing_path, Some(ProcessingPath::Inline));
    assert_eq!(harness.executor.paths(), vec![ProcessingPath::Inline]);
    assert_eq!(summary.attempts_for(WorkflowState::ProcessInline), 1);
    assert_eq!(summary.attempts_for(WorkflowState::ProcessBatchCompute), 0);
    assert!(summary.notifications.is_empty());
    assert!(harness.notifier.events().is_empty());

    let report = summary.load_report.as_ref().unwrap();
    assert_eq!(report.points_written, 120);
    assert!(report.is_balanced());
    assert_eq!(harness.points.len(), 120);

    let tagged = harness
        .points
        .count(
            &PointQuery::measurement("energy_generation")
                .with_tag("source_file", "generation/plants_2024.csv"),
        )
        .await
        .unwrap();
    assert_eq!(tagged, 120);

    let indexed = harness.indexer.requests();
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed[0].points_written, 120);
    assert_eq!(indexed[0].source_key, "generation/plants_2024.csv");
}

#[tokio::test]
async fn test_large_pdf_runs_on_batch_compute() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(10), generation_rows(10));

    let summary = harness
        .orchestrator
        .start_execution(object_event("reports/plant_availability.pdf", 200 * MB))
        .await;

    assert!(summary.is_completed());
    assert_eq!(summary.processing_path, Some(ProcessingPath::BatchCompute));
    assert_eq!(harness.executor.paths(), vec![ProcessingPath::BatchCompute]);

    let request = &harness.executor.requests()[0];
    assert_eq!(request.execution_id, summary.execution_id);
    assert_eq!(
        request.input_location,
        "s3://raw-energy/reports/plant_availability.pdf"
    );
    assert_eq!(request.processor_config.processor, "pdf-processor");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retries_then_notify() {
    let harness = PipelineHarness::new(
        ScriptedProcessingExecutor::always_failing(GridloadError::transient(
            "inline_executor",
            "request timed out",
        )),
        generation_rows(10),
    );

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/daily.csv", MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert_eq!(harness.executor.call_count(), 3);
    assert_eq!(summary.attempts_for(WorkflowState::ProcessInline), 3);
    match &summary.outcome {
        ExecutionOutcome::Failed {
            failing_state,
            error,
        } => {
            assert_eq!(*failing_state, WorkflowState::ProcessInline);
            assert!(matches!(error, GridloadError::TransientService { .. }));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let failures = harness.notifier.of_kind(NotificationKind::PipelineFailure);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].execution_or_job_id, summary.execution_id);
    assert_eq!(failures[0].stage, "process_inline");
    assert_eq!(failures[0].error_code, "SERVICE_TIMEOUT");
    assert_eq!(failures[0].original_input["key"], "generation/daily.csv");
    assert!(!failures[0].remediation.is_empty());
    assert!(harness.points.is_empty());
    assert!(harness.indexer.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_compute_stage_uses_its_own_policy() {
    let harness = PipelineHarness::new(
        ScriptedProcessingExecutor::always_failing(GridloadError::transient(
            "batch_executor",
            "connection reset",
        )),
        Vec::new(),
    );

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/fleet.csv", 500 * MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert_eq!(summary.attempts_for(WorkflowState::ProcessBatchCompute), 2);
    assert_eq!(harness.executor.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_when_retry_succeeds() {
    let harness = PipelineHarness::new(
        ScriptedProcessingExecutor::failing(
            2,
            GridloadError::transient("inline_executor", "request throttled"),
        ),
        generation_rows(25),
    );

    let summary = harness
        .orchestrator
        .start_execution(object_event("solar/array.csv", MB))
        .await;

    assert!(summary.is_completed());
    assert_eq!(summary.attempts_for(WorkflowState::ProcessInline), 3);
    assert!(harness.notifier.events().is_empty());
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let harness = PipelineHarness::new(
        ScriptedProcessingExecutor::always_failing(GridloadError::validation(
            "header row missing timestamp column",
        )),
        Vec::new(),
    );

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/bad.csv", MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(summary.attempts_for(WorkflowState::ProcessInline), 1);

    let failures = harness.notifier.of_kind(NotificationKind::PipelineFailure);
    assert_eq!(failures[0].error_code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unsupported_format_fails_at_route() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(0), Vec::new());

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/archive.zip", MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert_eq!(summary.attempts_for(WorkflowState::Route), 1);
    assert_eq!(harness.executor.call_count(), 0);
    assert_eq!(
        harness.notifier.of_kind(NotificationKind::PipelineFailure)[0].error_code,
        "UNSUPPORTED_FORMAT"
    );
}

#[tokio::test]
async fn test_replayed_event_is_a_duplicate() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(5), generation_rows(5));
    let raw = raw_event("generation/replayed.csv", MB);

    let first = harness.orchestrator.handle_event(&raw).await;
    let second = harness.orchestrator.handle_event(&raw).await;

    assert!(first[0].is_completed());
    assert!(second[0].is_duplicate());
    match &second[0].outcome {
        ExecutionOutcome::Duplicate {
            existing_execution_id,
            existing_state,
        } => {
            assert_eq!(existing_execution_id, &first[0].execution_id);
            assert_eq!(*existing_state, WorkflowState::Complete);
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(harness.indexer.requests().len(), 1);
}

#[tokio::test]
async fn test_new_etag_is_a_new_execution() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(5), generation_rows(5));

    let mut revised = raw_event("generation/revised.csv", MB);
    harness.orchestrator.handle_event(&revised).await;
    revised["eTag"] = json!("etag-second-upload");
    let summaries = harness.orchestrator.handle_event(&revised).await;

    assert!(summaries[0].is_completed());
    assert_eq!(harness.executor.call_count(), 2);
}

#[tokio::test]
async fn test_failed_identity_may_run_again() {
    let harness = PipelineHarness::new(
        ScriptedProcessingExecutor::failing(1, GridloadError::validation("corrupt file")),
        generation_rows(5),
    );
    let event = object_event("generation/retry_me.csv", MB);

    let first = harness.orchestrator.start_execution(event.clone()).await;
    let second = harness.orchestrator.start_execution(event).await;

    assert_eq!(first.final_state, WorkflowState::NotifyFailure);
    assert!(second.is_completed());
    assert_ne!(first.execution_id, second.execution_id);
}

#[tokio::test]
async fn test_concurrent_duplicates_run_once() {
    let harness = Arc::new(PipelineHarness::new(
        ScriptedProcessingExecutor::succeeding(5),
        generation_rows(5),
    ));
    let event = object_event("generation/burst.csv", MB);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let harness = harness.clone();
            let event = event.clone();
            tokio::spawn(async move { harness.orchestrator.start_execution(event).await })
        })
        .collect();

    let mut completed = 0;
    let mut duplicates = 0;
    for handle in handles {
        let summary = handle.await.unwrap();
        if summary.is_completed() {
            completed += 1;
        } else if summary.is_duplicate() {
            duplicates += 1;
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(harness.executor.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_load_notifies_and_completes() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(100), generation_rows(100));
    harness.points.reject_tag("plant_id", "P-0");

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/partial.csv", MB))
        .await;

    assert!(summary.is_completed());
    let report = summary.load_report.as_ref().unwrap();
    assert_eq!(report.points_written, 80);
    assert_eq!(report.manifest.failed_points.len(), 20);
    assert!(report.is_balanced());

    let partial = harness.notifier.of_kind(NotificationKind::PartialLoad);
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].stage, "load");
    assert_eq!(
        partial[0].manifest.as_ref().unwrap().failed_points.len(),
        20
    );
    assert_eq!(summary.notifications.len(), 1);
    assert_eq!(harness.indexer.requests()[0].points_written, 80);
}

#[tokio::test(start_paused = true)]
async fn test_partial_load_fails_when_configured_strict() {
    let mut config = test_config();
    config.load.fail_on_partial = true;
    let harness = PipelineHarness::with_config(
        config,
        ScriptedProcessingExecutor::succeeding(100),
        generation_rows(100),
    );
    harness.points.reject_tag("plant_id", "P-3");

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/strict.csv", MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert!(matches!(
        summary.error(),
        Some(GridloadError::Validation { .. })
    ));
    assert!(harness.indexer.requests().is_empty());

    let failures = harness.notifier.of_kind(NotificationKind::PipelineFailure);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, "load");
    assert_eq!(
        failures[0].manifest.as_ref().unwrap().failed_points.len(),
        20
    );
    assert!(harness.notifier.of_kind(NotificationKind::PartialLoad).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_store_fails_load_after_retries() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(10), generation_rows(10));
    harness.points.set_available(false);

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/outage.csv", MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert_eq!(summary.attempts_for(WorkflowState::Load), 3);
    assert!(matches!(
        summary.error(),
        Some(GridloadError::StoreUnavailable { .. })
    ));
    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(
        harness.notifier.of_kind(NotificationKind::PipelineFailure)[0].error_code,
        "STORE_UNAVAILABLE"
    );
}

#[tokio::test]
async fn test_broken_notifier_does_not_change_outcome() {
    let harness = PipelineHarness::with_notifier(
        test_config(),
        ScriptedProcessingExecutor::always_failing(GridloadError::validation("bad header")),
        Vec::new(),
        Arc::new(RecordingNotifier::broken()),
    );

    let summary = harness
        .orchestrator
        .start_execution(object_event("generation/broken.csv", MB))
        .await;

    assert_eq!(summary.final_state, WorkflowState::NotifyFailure);
    assert_eq!(summary.notifications.len(), 1);
    assert_eq!(harness.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_unrecognized_envelope_reaches_notify_failure() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(0), Vec::new());
    let raw = json!("not an event");

    let summaries = harness.orchestrator.handle_event(&raw).await;

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].final_state, WorkflowState::NotifyFailure);
    assert!(matches!(
        summaries[0].error(),
        Some(GridloadError::MissingFileInfo { .. })
    ));
    let failures = harness.notifier.of_kind(NotificationKind::PipelineFailure);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].original_input, raw);
    assert_eq!(harness.executor.call_count(), 0);
}

#[tokio::test]
async fn test_storage_notification_runs_one_execution_per_record() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(3), generation_rows(3));
    let raw = json!({
        "Records": [
            { "s3": { "bucket": { "name": "raw-energy" },
                      "object": { "key": "generation/a.csv", "size": 1024, "eTag": "a" } } },
            { "s3": { "bucket": { "name": "raw-energy" },
                      "object": { "key": "generation/b.csv", "size": 1024, "eTag": "b" } } }
        ]
    });

    let summaries = harness.orchestrator.handle_event(&raw).await;

    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.is_completed()));
    assert_ne!(summaries[0].execution_id, summaries[1].execution_id);
    assert_eq!(harness.executor.call_count(), 2);
}

#[tokio::test]
async fn test_lifecycle_events_follow_state_sequence() {
    let harness = PipelineHarness::new(ScriptedProcessingExecutor::succeeding(5), generation_rows(5));
    let mut events = harness.orchestrator.event_publisher().subscribe();

    harness
        .orchestrator
        .start_execution(object_event("generation/events.csv", MB))
        .await;

    let mut names = Vec::new();
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.name == system_events::PIPELINE_STATE_ENTERED {
            states.push(event.context["state"].as_str().unwrap_or_default().to_string());
        }
        names.push(event.name);
    }

    assert_eq!(names.first().map(String::as_str), Some(system_events::PIPELINE_EXECUTION_STARTED));
    assert_eq!(names.last().map(String::as_str), Some(system_events::PIPELINE_EXECUTION_COMPLETED));
    assert_eq!(
        states,
        vec!["route", "processing_choice", "process_inline", "load", "index"]
    );
}
