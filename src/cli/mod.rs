//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Cache-aware DAG pipeline runner for containerized tasks
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline-runner")]
#[command(version)]
#[command(about = "Run containerized task pipelines as a cache-aware DAG", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline specification
    Validate(ValidateCommand),

    /// List pipelines with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
