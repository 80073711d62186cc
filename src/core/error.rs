//! Error types for loading, building and running pipelines

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::state::TaskStatus;

/// Errors detected while loading a specification or building its graph.
///
/// All of these are fatal to a run before anything is dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("Malformed spec: {0}")]
    MalformedSpec(String),

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Task '{task}' references unknown executor '{executor}'")]
    UnknownExecutor { task: String, executor: String },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

impl SpecError {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SpecError::MalformedSpec(_) => "MalformedSpec",
            SpecError::DuplicateTask(_) => "DuplicateTask",
            SpecError::UnknownExecutor { .. } => "UnknownExecutor",
            SpecError::UnknownDependency { .. } => "UnknownDependency",
            SpecError::CyclicDependency { .. } => "CyclicDependency",
        }
    }
}

/// Per-task runtime error kinds, recovered at the graph level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    /// The runtime could not run the task or it exited unsuccessfully
    ExecutorFailure,
    /// The dispatch exceeded its timeout
    Timeout,
    /// The run was cancelled while the task was in flight
    Cancelled,
}

/// Failure details recorded on a task node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub summary: String,
    pub exit_code: Option<i32>,
    pub log_ref: Option<String>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            exit_code: None,
            log_ref: None,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.summary)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {})", code)?;
        }
        Ok(())
    }
}

/// Rejected status change on a task node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition for task '{task}': {from:?} -> {to:?}")]
pub struct TransitionError {
    pub task: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}
