//! Executor dispatcher - turns a ready task into an executor invocation

use crate::core::{ExecutorKind, GraphNode, TaskError, TaskErrorKind};
use crate::runtime::{ContainerRequest, ContainerRuntime, RuntimeError};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Environment variable carrying the output URI into containers
pub const OUTPUT_URI_ENV: &str = "OUTPUT_URI";

/// Result of dispatching a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecResult {
    Succeeded {
        output_ref: String,
        log_ref: Option<String>,
    },
    Failed(TaskError),
}

/// Run-wide values available to a dispatch
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub pipeline_name: String,
    pub pipeline_root: String,
    pub run_id: Uuid,
    pub parameters: BTreeMap<String, String>,

    /// Output references of the task's direct dependencies, by task name
    pub inputs: BTreeMap<String, String>,
}

impl DispatchContext {
    /// `<pipeline_root>/<pipeline>/<task>/<run_id>`
    pub fn output_uri(&self, task_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.pipeline_root.trim_end_matches('/'),
            self.pipeline_name,
            task_name,
            self.run_id
        )
    }

    /// Get all variables available for template rendering
    pub fn rendering_variables(&self, task_name: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("pipeline_name".to_string(), self.pipeline_name.clone());
        vars.insert("pipeline_root".to_string(), self.pipeline_root.clone());
        vars.insert("task_name".to_string(), task_name.to_string());
        vars.insert("run_id".to_string(), self.run_id.to_string());
        vars.insert("output_uri".to_string(), self.output_uri(task_name));

        for (key, value) in &self.parameters {
            vars.insert(format!("parameters.{}", key), value.clone());
        }
        for (task, output_ref) in &self.inputs {
            vars.insert(format!("inputs.{}", task), output_ref.clone());
        }

        vars
    }

    /// Rendering variables that stay the same from one run to the next.
    ///
    /// `run_id` and `output_uri` are left out, so their placeholders stay
    /// as written when an executor is rendered for its cache key.
    pub fn key_variables(&self, task_name: &str) -> HashMap<String, String> {
        let mut vars = self.rendering_variables(task_name);
        vars.remove("run_id");
        vars.remove("output_uri");
        vars
    }
}

/// Render every templated field of an executor definition
pub fn render_executor(kind: &ExecutorKind, vars: &HashMap<String, String>) -> ExecutorKind {
    let render_all = |parts: &[String]| -> Vec<String> {
        parts.iter().map(|part| render_template(part, vars)).collect()
    };

    match kind {
        ExecutorKind::Container(spec) => {
            let mut rendered = spec.clone();
            rendered.command = render_all(&spec.command);
            rendered.args = render_all(&spec.args);
            for value in rendered.env.values_mut() {
                *value = render_template(value.as_str(), vars);
            }
            ExecutorKind::Container(rendered)
        }
        ExecutorKind::Importer { artifact_uri } => ExecutorKind::Importer {
            artifact_uri: render_template(artifact_uri, vars),
        },
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}")
            .unwrap_or_else(|e| panic!("placeholder pattern is invalid: {}", e))
    })
}

/// Substitute `{{ name }}` placeholders. Unknown names are left as written.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match vars.get(name) {
                Some(value) => value.clone(),
                None => {
                    debug!("Unknown template placeholder: {}", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Dispatches tasks to the container runtime, or resolves importers inline
pub struct ExecutorDispatcher<R> {
    runtime: Arc<R>,
}

impl<R: ContainerRuntime> ExecutorDispatcher<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Render the container request for a node, if it runs in a container
    pub fn build_request(&self, node: &GraphNode, context: &DispatchContext) -> Option<ContainerRequest> {
        let spec = match &node.executor.kind {
            ExecutorKind::Container(spec) => spec,
            ExecutorKind::Importer { .. } => return None,
        };

        let vars = context.rendering_variables(node.name());
        let output_uri = context.output_uri(node.name());

        let argv = spec
            .argv()
            .iter()
            .map(|part| render_template(part, &vars))
            .collect();

        let mut env: BTreeMap<String, String> = spec
            .env
            .iter()
            .map(|(key, value)| (key.clone(), render_template(value, &vars)))
            .collect();
        env.entry(OUTPUT_URI_ENV.to_string())
            .or_insert_with(|| output_uri.clone());

        Some(ContainerRequest {
            task_name: node.name().to_string(),
            image: spec.image.clone(),
            argv,
            env,
            output_uri,
        })
    }

    /// Execute a node and report its outcome. Never panics on executor errors.
    pub async fn dispatch(
        &self,
        node: &GraphNode,
        context: &DispatchContext,
        time_limit: Option<Duration>,
    ) -> ExecResult {
        if let ExecutorKind::Importer { artifact_uri } = &node.executor.kind {
            let vars = context.rendering_variables(node.name());
            let output_ref = render_template(artifact_uri, &vars);
            info!("Importing artifact for task {}: {}", node.name(), output_ref);
            return ExecResult::Succeeded {
                output_ref,
                log_ref: None,
            };
        }

        let request = match self.build_request(node, context) {
            Some(request) => request,
            None => {
                return ExecResult::Failed(TaskError::new(
                    TaskErrorKind::ExecutorFailure,
                    "Executor has nothing to run",
                ))
            }
        };

        info!(
            "Dispatching task {} to {} ({})",
            node.name(),
            self.runtime.name(),
            request.image
        );
        debug!("Argv for task {}: {:?}", node.name(), request.argv);

        let outcome = match time_limit {
            Some(limit) => match timeout(limit, self.runtime.run(&request)).await {
                Ok(result) => result,
                Err(_) => {
                    error!("Timeout for task {} after {:?}", node.name(), limit);
                    return ExecResult::Failed(TaskError::new(
                        TaskErrorKind::Timeout,
                        format!("Timed out after {} seconds", limit.as_secs_f64()),
                    ));
                }
            },
            None => self.runtime.run(&request).await,
        };

        match outcome {
            Ok(output) if output.is_success() => ExecResult::Succeeded {
                output_ref: output.output_ref,
                log_ref: output.log_ref,
            },
            Ok(output) => {
                warn!("Task {} exited with code {}", node.name(), output.exit_code);
                ExecResult::Failed(TaskError {
                    kind: TaskErrorKind::ExecutorFailure,
                    summary: format!("Process exited with code {}", output.exit_code),
                    exit_code: Some(output.exit_code),
                    log_ref: output.log_ref,
                })
            }
            Err(e) => {
                error!("Runtime error for task {}: {}", node.name(), e);
                ExecResult::Failed(runtime_failure(e))
            }
        }
    }
}

fn runtime_failure(e: RuntimeError) -> TaskError {
    TaskError::new(TaskErrorKind::ExecutorFailure, e.to_string())
}
