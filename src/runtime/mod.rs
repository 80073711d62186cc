//! Container runtime boundary
//!
//! The engine never talks to a container engine directly. It hands a fully
//! rendered [`ContainerRequest`] to a [`ContainerRuntime`] and gets back the
//! process outcome.

pub mod client;
pub mod docker;
pub mod response;

use async_trait::async_trait;
pub use client::RuntimeConfig;
pub use docker::DockerCliRuntime;
pub use response::{ContainerOutput, ContainerRequest, RuntimeError};

/// Trait for container execution - allows for different implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run one container to completion.
    ///
    /// A process that ran and exited is `Ok` whatever its exit code; `Err` is
    /// reserved for failures to get the process running at all.
    async fn run(&self, request: &ContainerRequest) -> Result<ContainerOutput, RuntimeError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "container-runtime"
    }
}
