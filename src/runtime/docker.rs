//! Container runtime backed by the docker (or podman) CLI

use crate::runtime::{ContainerOutput, ContainerRequest, ContainerRuntime, RuntimeConfig, RuntimeError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code the docker CLI uses for its own failures
const ENGINE_ERROR_EXIT: i32 = 125;

/// Runs each request as `<binary> run --rm ... <image> <argv>`
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    config: RuntimeConfig,
}

impl DockerCliRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn binary(&self) -> &str {
        &self.config.binary
    }

    /// Local directory for an output URI, if it names one
    fn local_output_dir(output_uri: &str) -> Option<PathBuf> {
        if let Some(path) = output_uri.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if output_uri.contains("://") {
            return None;
        }
        Some(PathBuf::from(output_uri))
    }

    /// Arguments passed to the CLI, excluding the binary itself
    pub fn command_args(&self, request: &ContainerRequest, mount: Option<&Path>) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        args.extend(self.config.extra_args.iter().cloned());

        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(dir) = mount {
            args.push("-v".to_string());
            args.push(format!("{}:{}", dir.display(), dir.display()));
        }

        args.push(request.image.clone());
        args.extend(request.argv.iter().cloned());
        args
    }

    fn classify_engine_error(request: &ContainerRequest, stderr: &str) -> RuntimeError {
        let lower = stderr.to_lowercase();
        if lower.contains("unable to find image")
            || lower.contains("pull access denied")
            || lower.contains("manifest unknown")
        {
            RuntimeError::ImagePull {
                image: request.image.clone(),
                message: stderr.trim().to_string(),
            }
        } else {
            RuntimeError::Engine(stderr.trim().to_string())
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn run(&self, request: &ContainerRequest) -> Result<ContainerOutput, RuntimeError> {
        let output_dir = Self::local_output_dir(&request.output_uri);

        let mount = match (&output_dir, self.config.mount_outputs) {
            (Some(dir), true) => {
                tokio::fs::create_dir_all(dir).await?;
                Some(tokio::fs::canonicalize(dir).await?)
            }
            _ => None,
        };

        let args = self.command_args(request, mount.as_deref());
        debug!(
            "Spawning {} for task '{}': {}",
            self.config.binary,
            request.task_name,
            args.join(" ")
        );

        let output = Command::new(&self.config.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RuntimeError::Spawn(format!("Failed to execute {}: {}", self.config.binary, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        if exit_code == ENGINE_ERROR_EXIT {
            warn!(
                "{} failed to run task '{}': {}",
                self.config.binary,
                request.task_name,
                stderr.trim()
            );
            return Err(Self::classify_engine_error(request, &stderr));
        }

        let log_ref = match &output_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join("task.log");
                tokio::fs::write(&path, format!("{}{}", stdout, stderr)).await?;
                Some(path.display().to_string())
            }
            None => None,
        };

        if exit_code != 0 {
            warn!(
                "Task '{}' exited with code {}: {}",
                request.task_name,
                exit_code,
                stderr.trim()
            );
        }

        Ok(ContainerOutput {
            output_ref: request.output_uri.clone(),
            exit_code,
            log_ref,
        })
    }

    fn name(&self) -> &str {
        &self.config.binary
    }
}
