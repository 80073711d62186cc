//! Test: Concurrency - scheduling strategies bound in-flight dispatches

use crate::helpers::*;
use pipeline_runner::core::{RunStatus, TaskStatus};
use pipeline_runner::execution::{EngineOptions, SchedulingStrategy};
use std::time::Duration;

const FAN_OUT: &str = r#"
name: "fan-out"
tasks:
  - name: "shard-0"
    executor_label: "shard"
  - name: "shard-1"
    executor_label: "shard"
  - name: "shard-2"
    executor_label: "shard"
  - name: "shard-3"
    executor_label: "shard"
  - name: "merge"
    executor_label: "merge"
    dependent_tasks: ["shard-0", "shard-1", "shard-2", "shard-3"]
executors:
  shard:
    container:
      image: "shard"
  merge:
    container:
      image: "merge"
"#;

async fn run_with(strategy: SchedulingStrategy) -> PipelineTestResult {
    let runtime = MockRuntime::new().with_delay("shard", Duration::from_millis(50));
    let options = EngineOptions::new().with_strategy(strategy);
    let result = run_pipeline(FAN_OUT, runtime, options).await;

    assert_run_status(&result, RunStatus::Succeeded);
    assert_eq!(result.summary.count(TaskStatus::Succeeded), 5);
    for shard in ["shard-0", "shard-1", "shard-2", "shard-3"] {
        assert_dispatched_after(&result, shard, "merge");
    }
    result
}

#[tokio::test]
async fn test_parallel_runs_ready_tasks_together() {
    let result = run_with(SchedulingStrategy::Parallel).await;
    assert_eq!(result.runtime.max_running(), 4);
}

#[tokio::test]
async fn test_limited_parallel_caps_in_flight() {
    let result = run_with(SchedulingStrategy::LimitedParallel(2)).await;
    assert_eq!(result.runtime.max_running(), 2);
}

#[tokio::test]
async fn test_sequential_runs_one_at_a_time() {
    let result = run_with(SchedulingStrategy::Sequential).await;
    assert_eq!(result.runtime.max_running(), 1);
}

/// Tasks complete on a multi-threaded runtime too
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_threaded_runtime() {
    let result = run_with(SchedulingStrategy::LimitedParallel(3)).await;
    assert!(result.runtime.max_running() <= 3);
}
