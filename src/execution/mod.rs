//! Pipeline execution engine

pub mod dispatcher;
pub mod engine;
pub mod scheduler;

pub use dispatcher::{render_executor, render_template, DispatchContext, ExecResult, ExecutorDispatcher};
pub use engine::{EngineOptions, EventHandler, ExecutionEngine, ExecutionEvent, RunCanceller};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
