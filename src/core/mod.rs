//! Core domain models for pipelines
//!
//! This module defines the validated pipeline model, the spec loader, the
//! task graph built from it, and the per-run state tracker.

pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod state;

pub use error::*;
pub use graph::*;
pub use pipeline::*;
pub use state::*;
