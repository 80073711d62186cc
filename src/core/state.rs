//! Run state tracking
//!
//! [`RunState`] is the authoritative record of one pipeline run: the status
//! of every task node, its timestamps, cache key and output reference, and
//! the aggregate run status. Every status change goes through
//! [`TaskStatus::can_transition_to`], so an illegal move is reported instead
//! of silently applied.

use crate::core::error::{TaskError, TaskErrorKind, TransitionError};
use crate::core::graph::{NodeId, TaskGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a single task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting for dependencies
    Pending,
    /// All dependencies finished successfully; waiting for a worker
    Ready,
    /// Dispatched to the executor
    Running,
    /// Resolved from the cache without dispatch
    Cached,
    Succeeded,
    Failed,
    /// Not run because an upstream task failed
    Skipped,
    /// Not finished because the run was cancelled
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Cached
                | TaskStatus::Succeeded
                | TaskStatus::Failed
                | TaskStatus::Skipped
                | TaskStatus::Cancelled
        )
    }

    /// Terminal and non-failing: dependents may proceed
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Cached | TaskStatus::Succeeded)
    }

    /// The task state machine:
    /// `Pending -> Ready -> {Cached | Running} -> {Succeeded | Failed}`,
    /// plus `Pending | Ready -> Skipped` and `* -> Cancelled` for
    /// non-terminal states. `Ready -> Failed` covers a worker that died before
    /// it could dispatch.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Cached)
                | (Ready, Skipped)
                | (Ready, Failed)
                | (Ready, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// Aggregate status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    /// Every final output of the graph was lost to failures
    Failed,
    /// Some tasks failed but at least one independent branch succeeded
    PartiallyFailed,
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

/// Mutable run state of one task
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: NodeId,
    pub name: String,
    pub status: TaskStatus,
    /// Dependencies that have not finished successfully yet
    pub unresolved_deps: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cache_key: Option<String>,
    pub output_ref: Option<String>,
    /// Digest handed to dependents as this node's resolved input
    pub digest: Option<String>,
    pub error: Option<TaskError>,
    /// Upstream task whose failure caused this node to be skipped
    pub skipped_because: Option<String>,
}

impl TaskNode {
    fn new(id: NodeId, name: String, unresolved_deps: usize) -> Self {
        Self {
            id,
            name,
            status: TaskStatus::Pending,
            unresolved_deps,
            started_at: None,
            ended_at: None,
            cache_key: None,
            output_ref: None,
            digest: None,
            error: None,
            skipped_because: None,
        }
    }

    /// Wall time between start and end, if both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Authoritative state of one pipeline run
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    nodes: Vec<TaskNode>,
    sinks: Vec<NodeId>,
    cancelled: bool,
}

impl RunState {
    /// Fresh state with every node `Pending`
    pub fn new(graph: &TaskGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|n| TaskNode::new(n.id, n.name().to_string(), n.in_degree()))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: graph.pipeline().name.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            nodes,
            sinks: graph.sinks(),
            cancelled: false,
        }
    }

    pub fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn status_of(&self, id: NodeId) -> TaskStatus {
        self.nodes[id].status
    }

    fn transition(&mut self, id: NodeId, to: TaskStatus) -> Result<&mut TaskNode, TransitionError> {
        let node = &mut self.nodes[id];
        if !node.status.can_transition_to(to) {
            return Err(TransitionError {
                task: node.name.clone(),
                from: node.status,
                to,
            });
        }
        node.status = to;
        Ok(node)
    }

    /// One dependency of `id` finished successfully; returns how many remain
    pub fn resolve_dependency(&mut self, id: NodeId) -> usize {
        let node = &mut self.nodes[id];
        node.unresolved_deps = node.unresolved_deps.saturating_sub(1);
        node.unresolved_deps
    }

    pub fn mark_ready(&mut self, id: NodeId) -> Result<(), TransitionError> {
        self.transition(id, TaskStatus::Ready)?;
        Ok(())
    }

    pub fn mark_running(
        &mut self,
        id: NodeId,
        started_at: DateTime<Utc>,
        cache_key: Option<String>,
    ) -> Result<(), TransitionError> {
        let node = self.transition(id, TaskStatus::Running)?;
        node.started_at = Some(started_at);
        node.cache_key = cache_key;
        Ok(())
    }

    pub fn mark_cached(
        &mut self,
        id: NodeId,
        cache_key: String,
        output_ref: String,
        digest: String,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let node = self.transition(id, TaskStatus::Cached)?;
        node.cache_key = Some(cache_key);
        node.output_ref = Some(output_ref);
        node.digest = Some(digest);
        node.started_at = Some(started_at);
        node.ended_at = Some(ended_at);
        Ok(())
    }

    pub fn mark_succeeded(
        &mut self,
        id: NodeId,
        output_ref: String,
        digest: String,
        ended_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let node = self.transition(id, TaskStatus::Succeeded)?;
        node.output_ref = Some(output_ref);
        node.digest = Some(digest);
        node.ended_at = Some(ended_at);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        id: NodeId,
        error: TaskError,
        ended_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let node = self.transition(id, TaskStatus::Failed)?;
        node.error = Some(error);
        node.ended_at = Some(ended_at);
        Ok(())
    }

    pub fn mark_skipped(&mut self, id: NodeId, because: &str) -> Result<(), TransitionError> {
        let node = self.transition(id, TaskStatus::Skipped)?;
        node.skipped_because = Some(because.to_string());
        Ok(())
    }

    /// Move every non-terminal node to `Cancelled`; returns the nodes moved
    pub fn cancel_remaining(&mut self) -> Vec<NodeId> {
        self.cancelled = true;
        let now = Utc::now();
        let mut cancelled = Vec::new();

        for node in &mut self.nodes {
            if !node.status.is_terminal() {
                if node.status == TaskStatus::Running {
                    node.ended_at = Some(now);
                    node.error = Some(TaskError::new(
                        TaskErrorKind::Cancelled,
                        "Run cancelled while the task was running",
                    ));
                }
                node.status = TaskStatus::Cancelled;
                cancelled.push(node.id);
            }
        }

        cancelled
    }

    /// Every node has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// Aggregate status from the node statuses.
    ///
    /// With failures, the run is `PartiallyFailed` when at least one sink
    /// (a node nothing depends on) still succeeded, otherwise `Failed`.
    pub fn aggregate_status(&self) -> RunStatus {
        if self.cancelled {
            return RunStatus::Cancelled;
        }
        if !self.is_terminal() {
            return RunStatus::Running;
        }
        if self.nodes.iter().all(|n| n.status.is_success()) {
            return RunStatus::Succeeded;
        }

        let sink_succeeded = self
            .sinks
            .iter()
            .any(|&id| self.nodes[id].status.is_success());
        if sink_succeeded {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Failed
        }
    }

    /// Record the terminal status and completion time
    pub fn finish(&mut self) -> RunStatus {
        self.status = self.aggregate_status();
        self.completed_at = Some(Utc::now());
        self.status
    }

    /// Build the report of this run
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            pipeline_name: self.pipeline_name.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            tasks: self
                .nodes
                .iter()
                .map(|n| TaskSummary {
                    name: n.name.clone(),
                    status: n.status,
                    started_at: n.started_at,
                    ended_at: n.ended_at,
                    duration_ms: n.duration().map(|d| d.num_milliseconds()),
                    cache_key: n.cache_key.clone(),
                    output_ref: n.output_ref.clone(),
                    error: n.error.clone(),
                    skipped_because: n.skipped_because.clone(),
                })
                .collect(),
        }
    }
}

/// Final report line for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub cache_key: Option<String>,
    /// Output reference; for cache hits this is the reused reference
    pub output_ref: Option<String>,
    pub error: Option<TaskError>,
    pub skipped_because: Option<String>,
}

/// Report of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Tasks in declaration order
    pub tasks: Vec<TaskSummary>,
}

impl RunSummary {
    pub fn task(&self, name: &str) -> Option<&TaskSummary> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Fraction of tasks that finished successfully (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 1.0;
        }
        let done = self.tasks.iter().filter(|t| t.status.is_success()).count();
        done as f64 / self.tasks.len() as f64
    }
}
