//! Test: Cancellation - stopping a run mid-flight

use crate::helpers::*;
use pipeline_runner::cache::InMemoryCacheStore;
use pipeline_runner::core::{RunStatus, TaskStatus};
use pipeline_runner::execution::{EngineOptions, ExecutionEngine, ExecutionEvent, RunCanceller};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HANGING_PIPELINE: &str = r#"
name: "hanging"
tasks:
  - name: "prepare"
    executor_label: "prepare"
  - name: "serve"
    executor_label: "serve"
    dependent_tasks: ["prepare"]
    caching_options: {}
  - name: "teardown"
    executor_label: "teardown"
    dependent_tasks: ["serve"]
executors:
  prepare:
    container:
      image: "prepare"
  serve:
    container:
      image: "serve"
  teardown:
    container:
      image: "teardown"
"#;

/// Cancelling stops dispatching and marks everything unfinished `Cancelled`
#[tokio::test]
async fn test_cancel_in_flight_run() {
    let runtime = MockRuntime::new().with_outcome("serve", Outcome::Hang);
    let store = Arc::new(InMemoryCacheStore::new());
    let engine = ExecutionEngine::with_cache_store(runtime, EngineOptions::new(), store);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    // Cancel once the hanging task is running
    let canceller = RunCanceller::new();
    let trigger = canceller.clone();
    engine.add_event_handler(move |event| {
        if matches!(&event, ExecutionEvent::TaskStarted { task, .. } if task == "serve") {
            trigger.cancel();
        }
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_with_canceller(graph_from_yaml(HANGING_PIPELINE), &canceller),
    )
    .await
    .expect("cancelled run returns promptly");

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.task("prepare").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(summary.task("serve").unwrap().status, TaskStatus::Cancelled);
    assert_eq!(summary.task("teardown").unwrap().status, TaskStatus::Cancelled);
    assert!(summary.completed_at.is_some());

    // The aborted dispatch released its cache lease
    assert_eq!(engine.cache_gate().in_flight(), 0);

    let events = events.lock().unwrap();
    let cancelled: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::TaskCancelled { task } => Some(task.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(cancelled, vec!["serve", "teardown"]);
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunCompleted {
            status: RunStatus::Cancelled,
            ..
        })
    ));
}

/// A run cancelled before it starts dispatches nothing
#[tokio::test]
async fn test_cancel_before_start() {
    let engine = ExecutionEngine::new(MockRuntime::new(), EngineOptions::new());
    let canceller = RunCanceller::new();
    canceller.cancel();

    let summary = engine
        .execute_with_canceller(graph_from_yaml(TWO_STEP_PIPELINE), &canceller)
        .await;

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.count(TaskStatus::Cancelled), 2);
    assert!(engine.runtime().calls().is_empty());
}

/// An abandoned lease lets the next run compute the key
#[tokio::test]
async fn test_cancelled_task_is_not_cached() {
    let store = Arc::new(InMemoryCacheStore::new());
    let engine = ExecutionEngine::with_cache_store(
        MockRuntime::new().with_outcome("serve", Outcome::Hang),
        EngineOptions::new(),
        store.clone(),
    );
    let canceller = RunCanceller::new();
    let trigger = canceller.clone();
    engine.add_event_handler(move |event| {
        if matches!(&event, ExecutionEvent::TaskStarted { task, .. } if task == "serve") {
            trigger.cancel();
        }
    });
    engine
        .execute_with_canceller(graph_from_yaml(HANGING_PIPELINE), &canceller)
        .await;

    assert!(store.is_empty().await);
}
