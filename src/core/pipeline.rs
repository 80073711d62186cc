//! Pipeline domain model

use std::collections::BTreeMap;
use std::time::Duration;

/// A validated pipeline definition
///
/// Created by the spec loader and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Base URI under which task outputs are placed
    pub pipeline_root: String,

    /// Free-form parameters available to argument templating
    pub parameters: BTreeMap<String, String>,

    /// Tasks in declaration order (not execution order)
    pub tasks: Vec<Task>,

    /// Executor definitions by label
    pub executors: BTreeMap<String, Executor>,
}

impl Pipeline {
    /// Get a task by name
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Get the executor a task is bound to
    pub fn executor_for(&self, task: &Task) -> Option<&Executor> {
        self.executors.get(&task.executor_label)
    }

    /// Number of tasks that have caching enabled
    pub fn cacheable_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.caching.enabled).count()
    }
}

/// A single unit of work, bound to one executor
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique task name within the pipeline
    pub name: String,

    /// Label of the executor definition this task runs with
    pub executor_label: String,

    /// Names of tasks this task depends on (deduplicated, declaration order)
    pub dependent_tasks: Vec<String>,

    /// Caching configuration
    pub caching: CachingConfig,

    /// Per-task dispatch timeout (overrides the engine default)
    pub timeout: Option<Duration>,
}

/// Resolved caching configuration for a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachingConfig {
    /// Whether the cache gate is consulted for this task
    pub enabled: bool,

    /// Extra values mixed into the cache key
    pub key_inputs: Vec<String>,
}

impl CachingConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            key_inputs: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// A reusable definition of how to run a task
#[derive(Debug, Clone, PartialEq)]
pub struct Executor {
    pub label: String,
    pub kind: ExecutorKind,
}

/// The kinds of executors a task can reference
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorKind {
    /// Run a process inside a container image
    Container(ContainerSpec),

    /// Register an existing artifact as the task output without running anything
    Importer { artifact_uri: String },
}

impl ExecutorKind {
    /// Short name used in logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorKind::Container(_) => "container",
            ExecutorKind::Importer { .. } => "importer",
        }
    }
}

/// Container image and process argv
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,

    /// Process argv (may contain `{{ placeholder }}` templates)
    pub command: Vec<String>,

    /// Extra arguments appended after `command`
    pub args: Vec<String>,

    /// Environment passed to the container
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Full argv: command followed by args
    pub fn argv(&self) -> Vec<String> {
        self.command.iter().chain(self.args.iter()).cloned().collect()
    }
}
