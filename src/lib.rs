//! pipeline-runner - A cache-aware DAG pipeline runner for containerized tasks

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runtime;

// Re-export commonly used types
pub use cache::{CacheGate, CacheStore, InMemoryCacheStore};
pub use core::config::{load, PipelineSpec};
pub use core::{Pipeline, RunStatus, RunSummary, SpecError, TaskGraph, TaskStatus};
pub use execution::{EngineOptions, ExecutionEngine, ExecutionEvent, RunCanceller, SchedulingStrategy};
pub use runtime::{ContainerRuntime, DockerCliRuntime, RuntimeConfig};
