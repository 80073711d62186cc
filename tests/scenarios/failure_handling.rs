//! Test: Failure Handling - failed tasks skip their dependents only

use crate::helpers::*;
use pipeline_runner::core::{RunStatus, TaskErrorKind, TaskStatus};
use pipeline_runner::execution::{EngineOptions, ExecutionEvent};
use std::time::Duration;

const BRANCHING_PIPELINE: &str = r#"
name: "branching"
tasks:
  - name: "extract"
    executor_label: "extract"
  - name: "transform"
    executor_label: "transform"
    dependent_tasks: ["extract"]
  - name: "load"
    executor_label: "load"
    dependent_tasks: ["transform"]
  - name: "audit"
    executor_label: "audit"
    dependent_tasks: ["extract"]
  - name: "notify"
    executor_label: "notify"
executors:
  extract:
    container:
      image: "extract"
  transform:
    container:
      image: "transform"
  load:
    container:
      image: "load"
  audit:
    container:
      image: "audit"
  notify:
    container:
      image: "notify"
"#;

/// A failing task skips its transitive dependents and nothing else
#[tokio::test]
async fn test_failure_skips_dependents() {
    let runtime = MockRuntime::new().with_outcome("transform", Outcome::Exit(3));
    let result = run_pipeline(BRANCHING_PIPELINE, runtime, EngineOptions::new()).await;

    assert_task_status(&result, "extract", TaskStatus::Succeeded);
    assert_task_status(&result, "transform", TaskStatus::Failed);
    assert_task_status(&result, "load", TaskStatus::Skipped);
    assert_task_status(&result, "audit", TaskStatus::Succeeded);
    assert_task_status(&result, "notify", TaskStatus::Succeeded);

    // Some sinks still produced output
    assert_run_status(&result, RunStatus::PartiallyFailed);

    let error = result.task("transform").error.clone().expect("error recorded");
    assert_eq!(error.kind, TaskErrorKind::ExecutorFailure);
    assert_eq!(error.exit_code, Some(3));
    assert!(error.log_ref.is_some());

    assert_eq!(result.task("load").skipped_because.as_deref(), Some("transform"));
    assert_eq!(result.runtime.call_count("load"), 0);

    assert!(result.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::TaskSkipped { task, because } if task == "load" && because == "transform"
    )));
}

/// A failing root takes the whole chain down
#[tokio::test]
async fn test_failure_at_root_fails_run() {
    let runtime = MockRuntime::new().with_outcome("step-1-image", Outcome::Exit(1));
    let result = run_pipeline(TWO_STEP_PIPELINE, runtime, EngineOptions::new()).await;

    assert_run_status(&result, RunStatus::Failed);
    assert_task_status(&result, "Step 1", TaskStatus::Failed);
    assert_task_status(&result, "Step 2", TaskStatus::Skipped);
    assert!(result.task("Step 2").started_at.is_none());
}

/// Runtime errors become task failures, not run aborts
#[tokio::test]
async fn test_image_pull_failure_is_task_failure() {
    let runtime = MockRuntime::new()
        .with_outcome("extract", Outcome::PullError)
        .with_delay("notify", Duration::from_millis(50));
    let result = run_pipeline(BRANCHING_PIPELINE, runtime, EngineOptions::new()).await;

    assert_task_status(&result, "extract", TaskStatus::Failed);
    assert_task_status(&result, "transform", TaskStatus::Skipped);
    assert_task_status(&result, "load", TaskStatus::Skipped);
    assert_task_status(&result, "audit", TaskStatus::Skipped);

    // The sibling already in flight finishes normally
    assert_task_status(&result, "notify", TaskStatus::Succeeded);
    assert_run_status(&result, RunStatus::PartiallyFailed);

    let error = result.task("extract").error.clone().expect("error recorded");
    assert_eq!(error.kind, TaskErrorKind::ExecutorFailure);
    assert!(error.summary.contains("extract"));
    assert_eq!(error.exit_code, None);
}

/// Failed tasks do not write cache entries
#[tokio::test]
async fn test_failed_task_is_retried_next_run() {
    let store: std::sync::Arc<dyn pipeline_runner::cache::CacheStore> =
        std::sync::Arc::new(pipeline_runner::cache::InMemoryCacheStore::new());

    let failing = MockRuntime::new().with_outcome("step-1-image", Outcome::Exit(1));
    let first =
        run_pipeline_with_store(TWO_STEP_PIPELINE, failing, EngineOptions::new(), store.clone()).await;
    assert_run_status(&first, RunStatus::Failed);

    let second =
        run_pipeline_with_store(TWO_STEP_PIPELINE, MockRuntime::new(), EngineOptions::new(), store).await;
    assert_run_status(&second, RunStatus::Succeeded);
    assert_task_status(&second, "Step 1", TaskStatus::Succeeded);
    assert_eq!(second.runtime.call_count("Step 1"), 1);
}
