//! Test: Caching - reuse of prior outputs across and within runs

use crate::helpers::*;
use pipeline_runner::cache::{CacheStore, InMemoryCacheStore};
use pipeline_runner::core::{RunStatus, TaskStatus};
use pipeline_runner::execution::{EngineOptions, ExecutionEvent};
use std::sync::Arc;
use std::time::Duration;

fn shared_store() -> Arc<dyn CacheStore> {
    Arc::new(InMemoryCacheStore::new())
}

/// A second identical run resolves every task from the cache
#[tokio::test]
async fn test_second_run_is_cached() {
    let store = shared_store();

    let first =
        run_pipeline_with_store(TWO_STEP_PIPELINE, MockRuntime::new(), EngineOptions::new(), store.clone()).await;
    assert_run_status(&first, RunStatus::Succeeded);

    let second =
        run_pipeline_with_store(TWO_STEP_PIPELINE, MockRuntime::new(), EngineOptions::new(), store).await;
    assert_run_status(&second, RunStatus::Succeeded);
    assert_task_status(&second, "Step 1", TaskStatus::Cached);
    assert_task_status(&second, "Step 2", TaskStatus::Cached);
    assert!(second.runtime.calls().is_empty());

    // Same outputs and keys as the run that produced them
    for name in ["Step 1", "Step 2"] {
        assert_eq!(first.task(name).output_ref, second.task(name).output_ref);
        assert_eq!(first.task(name).cache_key, second.task(name).cache_key);
        assert!(second.task(name).cache_key.as_deref().unwrap().starts_with("blake3:"));
    }
}

/// `enable_cache: false` misses every run
#[tokio::test]
async fn test_disabled_caching_always_dispatches() {
    let yaml = r#"
name: "uncached"
tasks:
  - name: "compute"
    executor_label: "compute"
    caching_options:
      enable_cache: false
executors:
  compute:
    container:
      image: "compute"
      command: ["run"]
"#;
    let store = shared_store();

    for _ in 0..2 {
        let result =
            run_pipeline_with_store(yaml, MockRuntime::new(), EngineOptions::new(), store.clone()).await;
        assert_task_status(&result, "compute", TaskStatus::Succeeded);
        assert_eq!(result.runtime.call_count("compute"), 1);
        assert!(result.task("compute").cache_key.is_none());
    }
}

/// Without `caching_options` the pipeline default applies
#[tokio::test]
async fn test_pipeline_level_default() {
    let yaml = |enable: bool| {
        format!(
            r#"
name: "defaults"
enable_cache: {}
tasks:
  - name: "compute"
    executor_label: "compute"
executors:
  compute:
    container:
      image: "compute"
"#,
            enable
        )
    };

    for (enable, expected_calls) in [(true, 0), (false, 1)] {
        let store = shared_store();
        let spec = yaml(enable);
        run_pipeline_with_store(&spec, MockRuntime::new(), EngineOptions::new(), store.clone()).await;
        let second = run_pipeline_with_store(&spec, MockRuntime::new(), EngineOptions::new(), store).await;
        assert_eq!(second.runtime.call_count("compute"), expected_calls);
    }
}

/// The engine-wide switch overrides task settings
#[tokio::test]
async fn test_engine_switch_disables_cache() {
    let store = shared_store();
    let options = EngineOptions::new().with_caching(false);

    run_pipeline_with_store(TWO_STEP_PIPELINE, MockRuntime::new(), options.clone(), store.clone()).await;
    let second = run_pipeline_with_store(TWO_STEP_PIPELINE, MockRuntime::new(), options, store).await;

    assert_task_status(&second, "Step 1", TaskStatus::Succeeded);
    assert_task_status(&second, "Step 2", TaskStatus::Succeeded);
    assert_eq!(second.runtime.calls().len(), 2);
}

/// A re-executed upstream invalidates downstream entries
#[tokio::test]
async fn test_uncached_upstream_invalidates_downstream() {
    let yaml = r#"
name: "fresh-upstream"
tasks:
  - name: "snapshot"
    executor_label: "snapshot"
    caching_options:
      enable_cache: false
  - name: "report"
    executor_label: "report"
    dependent_tasks: ["snapshot"]
    caching_options: {}
executors:
  snapshot:
    container:
      image: "snapshot"
  report:
    container:
      image: "report"
"#;
    let store = shared_store();

    let first = run_pipeline_with_store(yaml, MockRuntime::new(), EngineOptions::new(), store.clone()).await;
    let second = run_pipeline_with_store(yaml, MockRuntime::new(), EngineOptions::new(), store).await;

    assert_task_status(&second, "snapshot", TaskStatus::Succeeded);
    assert_task_status(&second, "report", TaskStatus::Succeeded);
    assert_eq!(second.runtime.call_count("report"), 1);
    assert_ne!(first.task("report").cache_key, second.task("report").cache_key);
}

/// Changing key inputs changes the key
#[tokio::test]
async fn test_key_inputs_change_key() {
    let yaml = |version: &str| {
        format!(
            r#"
name: "versioned"
tasks:
  - name: "build"
    executor_label: "build"
    caching_options:
      key_inputs: ["{}"]
executors:
  build:
    container:
      image: "builder"
"#,
            version
        )
    };
    let store = shared_store();

    let v1 = run_pipeline_with_store(&yaml("v1"), MockRuntime::new(), EngineOptions::new(), store.clone()).await;
    let v1_again =
        run_pipeline_with_store(&yaml("v1"), MockRuntime::new(), EngineOptions::new(), store.clone()).await;
    let v2 = run_pipeline_with_store(&yaml("v2"), MockRuntime::new(), EngineOptions::new(), store).await;

    assert_task_status(&v1, "build", TaskStatus::Succeeded);
    assert_task_status(&v1_again, "build", TaskStatus::Cached);
    assert_task_status(&v2, "build", TaskStatus::Succeeded);
    assert_ne!(v1.task("build").cache_key, v2.task("build").cache_key);
}

/// Tasks sharing a key in one run dispatch once
#[tokio::test]
async fn test_concurrent_identical_tasks_dispatch_once() {
    let yaml = r#"
name: "twins"
tasks:
  - name: "left"
    executor_label: "shared"
    caching_options: {}
  - name: "right"
    executor_label: "shared"
    caching_options: {}
executors:
  shared:
    container:
      image: "shared"
      command: ["compute"]
"#;

    let runtime = MockRuntime::new().with_delay("shared", Duration::from_millis(100));
    let result = run_pipeline(yaml, runtime, EngineOptions::new()).await;

    assert_run_status(&result, RunStatus::Succeeded);
    assert_eq!(result.runtime.calls().len(), 1);
    assert_eq!(result.summary.count(TaskStatus::Succeeded), 1);
    assert_eq!(result.summary.count(TaskStatus::Cached), 1);
    assert_eq!(result.task("left").output_ref, result.task("right").output_ref);

    let cached_events = result
        .events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::TaskCached { .. }))
        .count();
    assert_eq!(cached_events, 1);
}

/// A waiter re-checks after the leader fails
#[tokio::test]
async fn test_waiter_dispatches_after_leader_failure() {
    let yaml = r#"
name: "flaky-twins"
tasks:
  - name: "left"
    executor_label: "shared"
    caching_options: {}
  - name: "right"
    executor_label: "shared"
    caching_options: {}
executors:
  shared:
    container:
      image: "shared"
"#;

    let runtime = MockRuntime::new()
        .with_outcome("shared", Outcome::Exit(2))
        .with_delay("shared", Duration::from_millis(50));
    let result = run_pipeline(yaml, runtime, EngineOptions::new()).await;

    // Both tasks ran and both failed on their own
    assert_eq!(result.runtime.calls().len(), 2);
    assert_eq!(result.summary.count(TaskStatus::Failed), 2);
    assert_run_status(&result, RunStatus::Failed);
}

/// Parameters rendered into the argv are part of the key
#[tokio::test]
async fn test_changed_parameter_misses_cache() {
    let yaml = |epochs: &str| {
        format!(
            r#"
name: "tuned"
enable_cache: true
parameters:
  epochs: "{}"
tasks:
  - name: "train"
    executor_label: "trainer"
executors:
  trainer:
    container:
      image: "trainer"
      command: ["train", "--epochs", "{{{{ parameters.epochs }}}}", "--out", "{{{{ output_uri }}}}"]
"#,
            epochs
        )
    };
    let store = shared_store();

    let five = run_pipeline_with_store(&yaml("5"), MockRuntime::new(), EngineOptions::new(), store.clone()).await;
    let ten = run_pipeline_with_store(&yaml("10"), MockRuntime::new(), EngineOptions::new(), store.clone()).await;
    let ten_again = run_pipeline_with_store(&yaml("10"), MockRuntime::new(), EngineOptions::new(), store).await;

    assert_task_status(&five, "train", TaskStatus::Succeeded);
    assert_task_status(&ten, "train", TaskStatus::Succeeded);
    assert_eq!(ten.runtime.call_count("train"), 1);
    assert_ne!(five.task("train").cache_key, ten.task("train").cache_key);
    assert_ne!(five.task("train").output_ref, ten.task("train").output_ref);

    // The run-scoped output URI does not break reuse
    assert_task_status(&ten_again, "train", TaskStatus::Cached);
    assert!(ten_again.runtime.calls().is_empty());
    assert_eq!(ten.task("train").output_ref, ten_again.task("train").output_ref);
}
