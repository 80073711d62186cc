//! Main execution engine - orchestrates an entire pipeline run
//!
//! One scheduling loop owns the [`RunState`] and the scheduler. Ready tasks
//! are handed to worker tasks which consult the cache gate, dispatch, and
//! report back over a channel; only the loop applies status transitions.

use crate::cache::{cache_key, completion_digest, CacheDecision, CacheGate, CacheStore, InMemoryCacheStore};
use crate::core::{
    NodeId, RunState, RunStatus, RunSummary, TaskError, TaskErrorKind, TaskGraph, TransitionError,
};
use crate::execution::{
    render_executor, DispatchContext, ExecResult, ExecutionScheduler, ExecutorDispatcher,
    SchedulingStrategy,
};
use crate::runtime::ContainerRuntime;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_tasks: usize,
    },
    TaskReady {
        task: String,
    },
    TaskStarted {
        task: String,
        cache_key: Option<String>,
    },
    TaskCached {
        task: String,
        output_ref: String,
    },
    TaskSucceeded {
        task: String,
        output_ref: String,
        duration_ms: Option<i64>,
    },
    TaskFailed {
        task: String,
        error: TaskError,
    },
    TaskSkipped {
        task: String,
        because: String,
    },
    TaskCancelled {
        task: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Engine settings, usually built from CLI flags
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub strategy: SchedulingStrategy,

    /// Timeout for tasks that do not set their own
    pub default_timeout: Option<Duration>,

    /// Master switch for the cache gate
    pub caching_enabled: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::Parallel,
            default_timeout: None,
            caching_enabled: true,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }
}

/// Handle that cancels a run from outside the engine
#[derive(Debug, Clone)]
pub struct RunCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl RunCanceller {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation; in-flight tasks are aborted
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for RunCanceller {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages from workers to the scheduling loop
#[derive(Debug)]
enum WorkerEvent {
    Cached {
        node: NodeId,
        cache_key: String,
        output_ref: String,
        started_at: DateTime<Utc>,
    },
    Started {
        node: NodeId,
        cache_key: Option<String>,
        at: DateTime<Utc>,
    },
    Finished {
        node: NodeId,
        cache_key: String,
        result: ExecResult,
        at: DateTime<Utc>,
    },
}

/// What a worker needs besides its own node
struct WorkerShared<R> {
    graph: Arc<TaskGraph>,
    dispatcher: Arc<ExecutorDispatcher<R>>,
    gate: Option<CacheGate>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<R> Clone for WorkerShared<R> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            dispatcher: Arc::clone(&self.dispatcher),
            gate: self.gate.clone(),
            events: self.events.clone(),
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    dispatcher: Arc<ExecutorDispatcher<R>>,
    gate: CacheGate,
    options: EngineOptions,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl<R: ContainerRuntime + 'static> ExecutionEngine<R> {
    /// Engine with an in-memory cache store
    pub fn new(runtime: R, options: EngineOptions) -> Self {
        Self::with_cache_store(runtime, options, Arc::new(InMemoryCacheStore::new()))
    }

    pub fn with_cache_store(runtime: R, options: EngineOptions, store: Arc<dyn CacheStore>) -> Self {
        Self {
            dispatcher: Arc::new(ExecutorDispatcher::new(Arc::new(runtime))),
            gate: CacheGate::new(store),
            options,
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn cache_gate(&self) -> &CacheGate {
        &self.gate
    }

    pub fn runtime(&self) -> &Arc<R> {
        self.dispatcher.runtime()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers().push(Arc::new(handler));
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<EventHandler>> {
        self.event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers: Vec<EventHandler> = self.handlers().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Execute a pipeline graph to completion
    pub async fn execute(&self, graph: Arc<TaskGraph>) -> RunSummary {
        self.execute_with_canceller(graph, &RunCanceller::new()).await
    }

    /// Execute a pipeline graph until it completes or `canceller` fires
    pub async fn execute_with_canceller(
        &self,
        graph: Arc<TaskGraph>,
        canceller: &RunCanceller,
    ) -> RunSummary {
        let mut state = RunState::new(&graph);
        let mut scheduler = ExecutionScheduler::new(Arc::clone(&graph), self.options.strategy);

        info!(
            "Starting pipeline run: {} ({})",
            state.pipeline_name, state.run_id
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id: state.run_id,
            pipeline_name: state.pipeline_name.clone(),
            total_tasks: graph.len(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = WorkerShared {
            graph: Arc::clone(&graph),
            dispatcher: Arc::clone(&self.dispatcher),
            gate: self.options.caching_enabled.then(|| self.gate.clone()),
            events: tx,
        };

        match scheduler.seed(&mut state) {
            Ok(ready) => self.emit_ready(&graph, &ready),
            Err(e) => error!("Failed to seed scheduler: {}", e),
        }

        let mut workers: JoinSet<()> = JoinSet::new();
        let mut worker_nodes: HashMap<tokio::task::Id, NodeId> = HashMap::new();
        let mut cancel_rx = canceller.subscribe();
        let mut cancel_open = true;
        let mut cancelled = *cancel_rx.borrow_and_update();

        while !cancelled {
            for id in scheduler.next_ready(workers.len()) {
                let context = self.dispatch_context(&graph, &state, id);
                let key = self.cache_key_for(&graph, &state, &context, id);
                let time_limit = graph.node(id).task.timeout.or(self.options.default_timeout);
                let handle = workers.spawn(run_worker(shared.clone(), id, context, key, time_limit));
                worker_nodes.insert(handle.id(), id);
            }

            if workers.is_empty() {
                // A worker can be reaped before its last message is read
                match rx.try_recv() {
                    Ok(event) => {
                        self.handle_worker_event(&graph, &mut state, &mut scheduler, event);
                        continue;
                    }
                    Err(_) => break,
                }
            }

            tokio::select! {
                biased;

                changed = cancel_rx.changed(), if cancel_open => {
                    match changed {
                        Ok(()) => cancelled = *cancel_rx.borrow_and_update(),
                        Err(_) => cancel_open = false,
                    }
                }

                Some(event) = rx.recv() => {
                    self.handle_worker_event(&graph, &mut state, &mut scheduler, event);
                }

                Some(joined) = workers.join_next_with_id() => {
                    match joined {
                        Ok((id, ())) => {
                            worker_nodes.remove(&id);
                        }
                        Err(e) => {
                            if let Some(node) = worker_nodes.remove(&e.id()) {
                                self.handle_worker_crash(&graph, &mut state, &mut scheduler, node, &e);
                            }
                        }
                    }
                }

                else => break,
            }
        }

        if cancelled {
            warn!("Run {} cancelled", state.run_id);
            workers.abort_all();
            while workers.join_next().await.is_some() {}

            // Results that finished before the abort still count
            while let Ok(event) = rx.try_recv() {
                self.handle_worker_event(&graph, &mut state, &mut scheduler, event);
            }

            for id in state.cancel_remaining() {
                self.emit_event(ExecutionEvent::TaskCancelled {
                    task: graph.node(id).name().to_string(),
                });
            }
        } else if !state.is_terminal() {
            error!("No tasks ready to run and none running - run stuck");
            state.cancel_remaining();
        }

        let status = state.finish();
        info!(
            "Pipeline run finished: {} - {:?}",
            state.pipeline_name, status
        );
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id: state.run_id,
            status,
        });

        state.summary()
    }

    fn dispatch_context(&self, graph: &TaskGraph, state: &RunState, id: NodeId) -> DispatchContext {
        let pipeline = graph.pipeline();
        let inputs = graph
            .node(id)
            .dependencies
            .iter()
            .filter_map(|&dep| {
                let node = state.node(dep);
                node.output_ref
                    .as_ref()
                    .map(|output_ref| (node.name.clone(), output_ref.clone()))
            })
            .collect();

        DispatchContext {
            pipeline_name: pipeline.name.clone(),
            pipeline_root: pipeline.pipeline_root.clone(),
            run_id: state.run_id,
            parameters: pipeline.parameters.clone(),
            inputs,
        }
    }

    /// Cache key over the rendered executor, key inputs and upstream completion digests
    fn cache_key_for(
        &self,
        graph: &TaskGraph,
        state: &RunState,
        context: &DispatchContext,
        id: NodeId,
    ) -> String {
        let node = graph.node(id);
        let digests: BTreeMap<String, String> = node
            .dependencies
            .iter()
            .map(|&dep| {
                let upstream = state.node(dep);
                (
                    upstream.name.clone(),
                    upstream.digest.clone().unwrap_or_default(),
                )
            })
            .collect();
        let executor = render_executor(&node.executor.kind, &context.key_variables(node.name()));
        cache_key(&node.task, &executor, &digests)
    }

    fn emit_ready(&self, graph: &TaskGraph, ready: &[NodeId]) {
        for &id in ready {
            self.emit_event(ExecutionEvent::TaskReady {
                task: graph.node(id).name().to_string(),
            });
        }
    }

    fn handle_worker_event(
        &self,
        graph: &TaskGraph,
        state: &mut RunState,
        scheduler: &mut ExecutionScheduler,
        event: WorkerEvent,
    ) {
        let result = match event {
            WorkerEvent::Cached {
                node,
                cache_key,
                output_ref,
                started_at,
            } => self.on_cached(graph, state, scheduler, node, cache_key, output_ref, started_at),
            WorkerEvent::Started { node, cache_key, at } => {
                state.mark_running(node, at, cache_key.clone()).map(|()| {
                    self.emit_event(ExecutionEvent::TaskStarted {
                        task: graph.node(node).name().to_string(),
                        cache_key,
                    });
                })
            }
            WorkerEvent::Finished {
                node,
                cache_key,
                result: ExecResult::Succeeded { output_ref, .. },
                at,
            } => self.on_succeeded(graph, state, scheduler, node, &cache_key, output_ref, at),
            WorkerEvent::Finished {
                node,
                result: ExecResult::Failed(error),
                at,
                ..
            } => self.on_failed(graph, state, scheduler, node, error, at),
        };

        if let Err(e) = result {
            error!("{}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_cached(
        &self,
        graph: &TaskGraph,
        state: &mut RunState,
        scheduler: &mut ExecutionScheduler,
        node: NodeId,
        cache_key: String,
        output_ref: String,
        started_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let digest = completion_digest(&cache_key, &output_ref);
        state.mark_cached(node, cache_key, output_ref.clone(), digest, started_at, Utc::now())?;

        let task = graph.node(node).name().to_string();
        info!("Task {} resolved from cache: {}", task, output_ref);
        self.emit_event(ExecutionEvent::TaskCached { task, output_ref });

        let ready = scheduler.complete(node, state)?;
        self.emit_ready(graph, &ready);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_succeeded(
        &self,
        graph: &TaskGraph,
        state: &mut RunState,
        scheduler: &mut ExecutionScheduler,
        node: NodeId,
        cache_key: &str,
        output_ref: String,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let digest = completion_digest(cache_key, &output_ref);
        state.mark_succeeded(node, output_ref.clone(), digest, at)?;

        let task = graph.node(node).name().to_string();
        let duration_ms = state.node(node).duration().map(|d| d.num_milliseconds());
        info!("Task {} completed successfully", task);
        self.emit_event(ExecutionEvent::TaskSucceeded {
            task,
            output_ref,
            duration_ms,
        });

        let ready = scheduler.complete(node, state)?;
        self.emit_ready(graph, &ready);
        Ok(())
    }

    fn on_failed(
        &self,
        graph: &TaskGraph,
        state: &mut RunState,
        scheduler: &mut ExecutionScheduler,
        node: NodeId,
        error: TaskError,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let task = graph.node(node).name().to_string();
        warn!("Task {} failed: {}", task, error);
        state.mark_failed(node, error.clone(), at)?;
        self.emit_event(ExecutionEvent::TaskFailed {
            task: task.clone(),
            error,
        });

        for skipped in scheduler.fail(node, state)? {
            let name = graph.node(skipped).name().to_string();
            debug!("Skipping task {} because {} failed", name, task);
            self.emit_event(ExecutionEvent::TaskSkipped {
                task: name,
                because: task.clone(),
            });
        }
        Ok(())
    }

    fn handle_worker_crash(
        &self,
        graph: &TaskGraph,
        state: &mut RunState,
        scheduler: &mut ExecutionScheduler,
        node: NodeId,
        e: &tokio::task::JoinError,
    ) {
        if state.status_of(node).is_terminal() {
            return;
        }
        error!("Worker for task {} crashed: {}", graph.node(node).name(), e);
        let error = TaskError::new(
            TaskErrorKind::ExecutorFailure,
            format!("Worker crashed: {}", e),
        );
        if let Err(e) = self.on_failed(graph, state, scheduler, node, error, Utc::now()) {
            error!("{}", e);
        }
    }
}

/// Consult the cache, dispatch on a miss, and report back to the loop
async fn run_worker<R: ContainerRuntime>(
    shared: WorkerShared<R>,
    id: NodeId,
    context: DispatchContext,
    key: String,
    time_limit: Option<Duration>,
) {
    let node = shared.graph.node(id);
    let started_at = Utc::now();

    let use_cache = node.task.caching.enabled;
    let lease = match (&shared.gate, use_cache) {
        (Some(gate), true) => match gate.check(&key).await {
            CacheDecision::Hit(output_ref) => {
                let _ = shared.events.send(WorkerEvent::Cached {
                    node: id,
                    cache_key: key,
                    output_ref,
                    started_at,
                });
                return;
            }
            CacheDecision::Miss(lease) => Some(lease),
        },
        _ => None,
    };

    let _ = shared.events.send(WorkerEvent::Started {
        node: id,
        cache_key: lease.as_ref().map(|_| key.clone()),
        at: Utc::now(),
    });

    let result = shared.dispatcher.dispatch(node, &context, time_limit).await;

    if let Some(lease) = lease {
        match &result {
            ExecResult::Succeeded { output_ref, .. } => lease.record(output_ref).await,
            ExecResult::Failed(_) => lease.abandon(),
        }
    }

    let _ = shared.events.send(WorkerEvent::Finished {
        node: id,
        cache_key: key,
        result,
        at: Utc::now(),
    });
}
