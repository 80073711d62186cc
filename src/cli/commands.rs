//! CLI command definitions

use crate::execution::{EngineOptions, SchedulingStrategy};
use clap::Args;
use std::time::Duration;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline spec (YAML, or JSON with a .json extension)
    #[arg(short, long)]
    pub file: String,

    /// Parameter overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrency limit for the parallel-limited strategy
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Disable the cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Default task timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Container engine CLI used to run tasks
    #[arg(long, default_value = "docker")]
    pub runtime_binary: String,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel)
            }
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        let mut options = EngineOptions::new()
            .with_strategy(self.scheduling_strategy())
            .with_caching(!self.no_cache);
        if let Some(secs) = self.timeout {
            options = options.with_default_timeout(Duration::from_secs(secs));
        }
        options
    }
}

/// Validate a pipeline specification
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline spec
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show the full report of one run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
