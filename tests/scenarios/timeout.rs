//! Test: Timeouts - hung dispatches fail with a `Timeout` error

use crate::helpers::*;
use pipeline_runner::core::{RunStatus, TaskErrorKind, TaskStatus};
use pipeline_runner::execution::EngineOptions;
use std::time::Duration;

/// The engine default applies to tasks without their own timeout
#[tokio::test]
async fn test_default_timeout() {
    let runtime = MockRuntime::new().with_outcome("step-1-image", Outcome::Hang);
    let options = EngineOptions::new().with_default_timeout(Duration::from_millis(100));
    let result = run_pipeline(TWO_STEP_PIPELINE, runtime, options).await;

    assert_run_status(&result, RunStatus::Failed);
    assert_task_status(&result, "Step 1", TaskStatus::Failed);
    assert_task_status(&result, "Step 2", TaskStatus::Skipped);

    let error = result.task("Step 1").error.clone().expect("error recorded");
    assert_eq!(error.kind, TaskErrorKind::Timeout);
}

/// A task's own timeout wins over the engine default
#[tokio::test]
async fn test_task_timeout_overrides_default() {
    let yaml = r#"
name: "slow-and-bounded"
tasks:
  - name: "slow"
    executor_label: "slow"
    timeout_secs: 1
  - name: "quick"
    executor_label: "quick"
executors:
  slow:
    container:
      image: "slow"
  quick:
    container:
      image: "quick"
"#;

    // The slow task finishes within its own limit but not the default
    let runtime = MockRuntime::new()
        .with_delay("slow", Duration::from_millis(300))
        .with_delay("quick", Duration::from_millis(300));
    let options = EngineOptions::new().with_default_timeout(Duration::from_millis(100));
    let result = run_pipeline(yaml, runtime, options).await;

    assert_task_status(&result, "slow", TaskStatus::Succeeded);
    assert_task_status(&result, "quick", TaskStatus::Failed);
    assert_run_status(&result, RunStatus::PartiallyFailed);
}
