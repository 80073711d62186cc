//! Pipeline specification documents and the spec loader
//!
//! A specification is deserialized into [`PipelineSpec`] (YAML or JSON) and
//! then turned into a validated [`Pipeline`] by [`load`]. Loading is a pure
//! transform: it never touches the filesystem or starts anything.

use crate::core::error::SpecError;
use crate::core::pipeline::{CachingConfig, ContainerSpec, Executor, ExecutorKind, Pipeline, Task};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default base URI for task outputs when the pipeline spec does not set one
pub const DEFAULT_PIPELINE_ROOT: &str = "./pipeline-outputs";

/// Top-level pipeline specification document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name
    #[serde(default)]
    pub name: String,

    /// Base URI for task outputs
    #[serde(default)]
    pub pipeline_root: Option<String>,

    /// Caching default for tasks without `caching_options`
    #[serde(default)]
    pub enable_cache: Option<bool>,

    /// Parameters available to argument templating
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,

    /// Executor definitions by label
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorSpec>,
}

/// Task entry as written in the specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub executor_label: String,

    /// Names of the tasks this task depends on
    #[serde(default)]
    pub dependent_tasks: Vec<String>,

    /// Caching directives; `{}` enables caching with the default key
    #[serde(default)]
    pub caching_options: Option<CachingOptions>,

    /// Dispatch timeout for this task
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Caching directives of a task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachingOptions {
    /// Explicit on/off switch; absent means enabled
    #[serde(default)]
    pub enable_cache: Option<bool>,

    /// Extra values mixed into the cache key
    #[serde(default)]
    pub key_inputs: Vec<String>,
}

/// Executor entry; exactly one kind must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSpec {
    #[serde(default)]
    pub container: Option<ContainerConfig>,

    #[serde(default)]
    pub importer: Option<ImporterConfig>,
}

/// Container executor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Importer executor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImporterConfig {
    #[serde(default)]
    pub artifact_uri: String,
}

impl PipelineSpec {
    /// Load a specification from a file; `.json` files are parsed as JSON,
    /// everything else as YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read spec file {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let spec = if is_json {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        Ok(spec)
    }

    /// Parse a specification from a YAML string
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, SpecError> {
        serde_yaml::from_str(yaml).map_err(|e| SpecError::MalformedSpec(e.to_string()))
    }

    /// Parse a specification from a JSON string
    pub fn from_json(json: &str) -> std::result::Result<Self, SpecError> {
        serde_json::from_str(json).map_err(|e| SpecError::MalformedSpec(e.to_string()))
    }

    /// Validate and convert into a [`Pipeline`]
    pub fn load(&self) -> std::result::Result<Pipeline, SpecError> {
        load(self)
    }
}

/// Turn a deserialized specification into a validated [`Pipeline`].
///
/// Checks required fields, executor references and task name uniqueness.
/// Dependency resolution and cycle detection are left to the graph builder.
pub fn load(spec: &PipelineSpec) -> std::result::Result<Pipeline, SpecError> {
    if spec.name.trim().is_empty() {
        return Err(SpecError::MalformedSpec(
            "pipeline name must not be empty".to_string(),
        ));
    }

    let executors = load_executors(&spec.executors)?;

    let default_caching = spec.enable_cache.unwrap_or(false);
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(spec.tasks.len());

    for (index, task) in spec.tasks.iter().enumerate() {
        if task.name.trim().is_empty() {
            return Err(SpecError::MalformedSpec(format!(
                "task #{} has an empty name",
                index + 1
            )));
        }
        if task.executor_label.trim().is_empty() {
            return Err(SpecError::MalformedSpec(format!(
                "task '{}' has an empty executor_label",
                task.name
            )));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(SpecError::DuplicateTask(task.name.clone()));
        }
        if !executors.contains_key(&task.executor_label) {
            return Err(SpecError::UnknownExecutor {
                task: task.name.clone(),
                executor: task.executor_label.clone(),
            });
        }

        tasks.push(Task {
            name: task.name.clone(),
            executor_label: task.executor_label.clone(),
            dependent_tasks: dedup_dependencies(task)?,
            caching: resolve_caching(task.caching_options.as_ref(), default_caching),
            timeout: task.timeout_secs.map(Duration::from_secs),
        });
    }

    Ok(Pipeline {
        name: spec.name.clone(),
        pipeline_root: spec
            .pipeline_root
            .clone()
            .filter(|root| !root.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PIPELINE_ROOT.to_string()),
        parameters: spec.parameters.clone(),
        tasks,
        executors,
    })
}

/// Caching resolution:
/// - `caching_options` present: enabled unless `enable_cache: false`
/// - `caching_options` absent: pipeline-level `enable_cache` (default off)
fn resolve_caching(options: Option<&CachingOptions>, pipeline_default: bool) -> CachingConfig {
    match options {
        Some(opts) => CachingConfig {
            enabled: opts.enable_cache.unwrap_or(true),
            key_inputs: opts.key_inputs.clone(),
        },
        None if pipeline_default => CachingConfig::enabled(),
        None => CachingConfig::disabled(),
    }
}

fn dedup_dependencies(task: &TaskSpec) -> std::result::Result<Vec<String>, SpecError> {
    let mut seen = HashSet::new();
    let mut deps = Vec::with_capacity(task.dependent_tasks.len());
    for dep in &task.dependent_tasks {
        if dep.trim().is_empty() {
            return Err(SpecError::MalformedSpec(format!(
                "task '{}' has an empty entry in dependent_tasks",
                task.name
            )));
        }
        if seen.insert(dep.as_str()) {
            deps.push(dep.clone());
        }
    }
    Ok(deps)
}

fn load_executors(
    specs: &BTreeMap<String, ExecutorSpec>,
) -> std::result::Result<BTreeMap<String, Executor>, SpecError> {
    let mut executors = BTreeMap::new();

    for (label, spec) in specs {
        if label.trim().is_empty() {
            return Err(SpecError::MalformedSpec(
                "executor label must not be empty".to_string(),
            ));
        }

        let kind = match (&spec.container, &spec.importer) {
            (Some(container), None) => {
                if container.image.trim().is_empty() {
                    return Err(SpecError::MalformedSpec(format!(
                        "executor '{}' has a container without an image",
                        label
                    )));
                }
                ExecutorKind::Container(ContainerSpec {
                    image: container.image.clone(),
                    command: container.command.clone(),
                    args: container.args.clone(),
                    env: container.env.clone(),
                })
            }
            (None, Some(importer)) => {
                if importer.artifact_uri.trim().is_empty() {
                    return Err(SpecError::MalformedSpec(format!(
                        "executor '{}' has an importer without an artifact_uri",
                        label
                    )));
                }
                ExecutorKind::Importer {
                    artifact_uri: importer.artifact_uri.clone(),
                }
            }
            (Some(_), Some(_)) => {
                return Err(SpecError::MalformedSpec(format!(
                    "executor '{}' must define exactly one of container or importer",
                    label
                )));
            }
            (None, None) => {
                return Err(SpecError::MalformedSpec(format!(
                    "executor '{}' defines neither container nor importer",
                    label
                )));
            }
        };

        executors.insert(
            label.clone(),
            Executor {
                label: label.clone(),
                kind,
            },
        );
    }

    Ok(executors)
}

/// Read, parse and validate a pipeline file in one go
pub fn load_pipeline<P: AsRef<Path>>(path: P) -> Result<Pipeline> {
    let spec = PipelineSpec::from_file(path)?;
    Ok(spec.load()?)
}
