//! Runtime request and response types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error types for runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to pull image '{image}': {message}")]
    ImagePull { image: String, message: String },

    #[error("Failed to start container: {0}")]
    Spawn(String),

    #[error("Container engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully rendered container invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Task the request belongs to
    pub task_name: String,

    pub image: String,

    /// Process argv with all placeholders substituted
    pub argv: Vec<String>,

    pub env: BTreeMap<String, String>,

    /// Where the task is expected to place its output
    pub output_uri: String,
}

/// Outcome of a container that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOutput {
    /// Reference to the produced output
    pub output_ref: String,

    pub exit_code: i32,

    /// Where the captured logs were written, if anywhere
    pub log_ref: Option<String>,
}

impl ContainerOutput {
    pub fn success(output_ref: impl Into<String>) -> Self {
        Self {
            output_ref: output_ref.into(),
            exit_code: 0,
            log_ref: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}
