//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{RunStatus, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One row of run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Progress (0.0 to 1.0)
    pub progress: f64,

    /// Tasks that ended `Succeeded` or `Cached`
    pub completed_tasks: usize,

    pub total_tasks: usize,
}

impl From<&RunSummary> for RunRecord {
    fn from(summary: &RunSummary) -> Self {
        Self {
            run_id: summary.run_id,
            pipeline_name: summary.pipeline_name.clone(),
            status: summary.status,
            started_at: summary.started_at,
            completed_at: summary.completed_at,
            progress: summary.progress(),
            completed_tasks: summary
                .tasks
                .iter()
                .filter(|t| t.status.is_success())
                .count(),
            total_tasks: summary.tasks.len(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save the report of a finished run
    async fn save_run(&self, summary: &RunSummary) -> Result<()>;

    /// Load a full run report by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunRecord>>;

    /// List all pipeline names with recorded runs
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            by_pipeline: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        let is_new = runs.insert(summary.run_id, summary.clone()).is_none();

        if is_new {
            let mut by_pipeline = self.by_pipeline.write().await;
            by_pipeline
                .entry(summary.pipeline_name.clone())
                .or_insert_with(Vec::new)
                .push(summary.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<RunRecord> = by_pipeline
            .get(pipeline_name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| runs.get(id))
                    .map(RunRecord::from)
                    .collect()
            })
            .unwrap_or_default();

        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Directory for local databases, created on demand
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    let dir = base.join("pipeline-runner");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    Ok(dir)
}

/// Open a SQLite pool, creating the database file if needed
#[cfg(feature = "sqlite")]
pub(crate) async fn connect_sqlite(db_path: &str) -> Result<sqlx::SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    let in_memory = db_path == ":memory:";
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
        .context("Invalid database path")?
        .create_if_missing(true);

    // Every connection to :memory: is a separate database
    let max_connections = if in_memory { 1 } else { 4 };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("Failed to connect to database")
}
