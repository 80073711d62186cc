//! Test utility functions for pipeline-runner

#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_runner::cache::{CacheStore, InMemoryCacheStore};
use pipeline_runner::core::config::PipelineSpec;
use pipeline_runner::core::{RunStatus, RunSummary, TaskGraph, TaskStatus, TaskSummary};
use pipeline_runner::execution::{EngineOptions, ExecutionEngine, ExecutionEvent};
use pipeline_runner::runtime::{ContainerOutput, ContainerRequest, ContainerRuntime, RuntimeError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How the mock runtime answers for one image
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Exit 0 and report the requested output URI
    Succeed,
    /// Exit with the given non-zero code
    Exit(i32),
    /// The image cannot be pulled
    PullError,
    /// Never return
    Hang,
}

/// One call the mock runtime received
#[derive(Debug, Clone)]
pub struct Call {
    pub task_name: String,
    pub image: String,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub started: Instant,
    pub ended: Option<Instant>,
}

/// Container runtime that answers from a per-image script
///
/// Images without a scripted outcome succeed.
#[derive(Default)]
pub struct MockRuntime {
    outcomes: HashMap<String, Outcome>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, image: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(image.to_string(), outcome);
        self
    }

    pub fn with_delay(mut self, image: &str, delay: Duration) -> Self {
        self.delays.insert(image.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call(&self, task_name: &str) -> Option<Call> {
        self.calls().into_iter().find(|c| c.task_name == task_name)
    }

    /// Number of dispatches a task received
    pub fn call_count(&self, task_name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.task_name == task_name)
            .count()
    }

    /// Highest number of calls that were in flight at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn record_start(&self, request: &ContainerRequest) -> usize {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let mut calls = self.calls.lock().unwrap();
        calls.push(Call {
            task_name: request.task_name.clone(),
            image: request.image.clone(),
            argv: request.argv.clone(),
            env: request
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            started: Instant::now(),
            ended: None,
        });
        calls.len() - 1
    }

    fn record_end(&self, index: usize) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(call) = self.calls.lock().unwrap().get_mut(index) {
            call.ended = Some(Instant::now());
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn run(&self, request: &ContainerRequest) -> Result<ContainerOutput, RuntimeError> {
        let index = self.record_start(request);
        let outcome = self
            .outcomes
            .get(&request.image)
            .cloned()
            .unwrap_or(Outcome::Succeed);

        if let Some(delay) = self.delays.get(&request.image) {
            tokio::time::sleep(*delay).await;
        }

        let result = match outcome {
            Outcome::Succeed => Ok(ContainerOutput::success(request.output_uri.clone())),
            Outcome::Exit(code) => Ok(ContainerOutput {
                output_ref: request.output_uri.clone(),
                exit_code: code,
                log_ref: Some(format!("{}/task.log", request.output_uri)),
            }),
            Outcome::PullError => Err(RuntimeError::ImagePull {
                image: request.image.clone(),
                message: "manifest unknown".to_string(),
            }),
            Outcome::Hang => std::future::pending().await,
        };

        self.record_end(index);
        result
    }

    fn name(&self) -> &str {
        "mock-runtime"
    }
}

/// Build a graph from a YAML spec, panicking on invalid specs
pub fn graph_from_yaml(yaml: &str) -> Arc<TaskGraph> {
    let pipeline = PipelineSpec::from_yaml(yaml)
        .expect("Failed to parse test spec")
        .load()
        .expect("Failed to load test spec");
    Arc::new(TaskGraph::build(&pipeline).expect("Failed to build test graph"))
}

/// Result of running a pipeline against the mock runtime
pub struct PipelineTestResult {
    pub summary: RunSummary,
    pub events: Vec<ExecutionEvent>,
    pub runtime: Arc<MockRuntime>,
}

impl PipelineTestResult {
    pub fn task(&self, name: &str) -> &TaskSummary {
        self.summary
            .task(name)
            .unwrap_or_else(|| panic!("Task '{}' not in summary", name))
    }

    pub fn status_of(&self, name: &str) -> TaskStatus {
        self.task(name).status
    }

    /// Task names in the order their `TaskStarted` or `TaskCached` event fired
    pub fn start_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::TaskStarted { task, .. } | ExecutionEvent::TaskCached { task, .. } => {
                    Some(task.clone())
                }
                _ => None,
            })
            .collect()
    }
}

/// Run a pipeline with a fresh in-memory cache
pub async fn run_pipeline(
    yaml: &str,
    runtime: MockRuntime,
    options: EngineOptions,
) -> PipelineTestResult {
    run_pipeline_with_store(yaml, runtime, options, Arc::new(InMemoryCacheStore::new())).await
}

/// Run a pipeline against a shared cache store
pub async fn run_pipeline_with_store(
    yaml: &str,
    runtime: MockRuntime,
    options: EngineOptions,
    store: Arc<dyn CacheStore>,
) -> PipelineTestResult {
    let graph = graph_from_yaml(yaml);
    let engine = ExecutionEngine::with_cache_store(runtime, options, store);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let summary = engine.execute(graph).await;
    let events = events.lock().unwrap().clone();

    PipelineTestResult {
        summary,
        events,
        runtime: Arc::clone(engine.runtime()),
    }
}

pub fn assert_run_status(result: &PipelineTestResult, expected: RunStatus) {
    assert_eq!(
        result.summary.status, expected,
        "Unexpected run status. Tasks: {:#?}",
        result.summary.tasks
    );
}

pub fn assert_task_status(result: &PipelineTestResult, task: &str, expected: TaskStatus) {
    let actual = result.status_of(task);
    assert_eq!(
        actual, expected,
        "Task '{}' ended {:?}, expected {:?}",
        task, actual, expected
    );
}

/// Assert `later` was dispatched only after `earlier` returned
pub fn assert_dispatched_after(result: &PipelineTestResult, earlier: &str, later: &str) {
    let first = result
        .runtime
        .call(earlier)
        .unwrap_or_else(|| panic!("Task '{}' was never dispatched", earlier));
    let second = result
        .runtime
        .call(later)
        .unwrap_or_else(|| panic!("Task '{}' was never dispatched", later));
    let first_end = first
        .ended
        .unwrap_or_else(|| panic!("Task '{}' never returned", earlier));
    assert!(
        second.started >= first_end,
        "Task '{}' started before '{}' ended",
        later,
        earlier
    );
}

/// A two-task pipeline with a linear dependency and caching enabled
pub const TWO_STEP_PIPELINE: &str = r#"
name: "two-step-task-only-dependency-pipeline"
pipeline_root: "/tmp/pipeline-runner-tests"
tasks:
  - name: "Step 1"
    executor_label: "step-1"
    caching_options: {}
  - name: "Step 2"
    executor_label: "step-2"
    dependent_tasks: ["Step 1"]
    caching_options: {}
executors:
  step-1:
    container:
      image: "step-1-image"
      command: ["run", "step-1"]
  step-2:
    container:
      image: "step-2-image"
      command: ["run", "step-2"]
"#;
