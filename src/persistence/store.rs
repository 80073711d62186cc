//! SQLite-based run history store

use crate::core::{RunStatus, RunSummary};
use crate::persistence::{connect_sqlite, data_dir, PersistenceBackend, RunRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = connect_sqlite(db_path).await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = data_dir()?.join("runs.db");
        Self::new(&db_path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                completed_tasks INTEGER NOT NULL DEFAULT 0,
                total_tasks INTEGER NOT NULL DEFAULT 0,
                report TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_name ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize run history schema")?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> RunStatus {
        match status {
            "Succeeded" => RunStatus::Succeeded,
            "Failed" => RunStatus::Failed,
            "PartiallyFailed" => RunStatus::PartiallyFailed,
            "Cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Running,
        }
    }

    fn record_from_row(row: &SqliteRow) -> Result<RunRecord> {
        Ok(RunRecord {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            progress: row.get("progress"),
            completed_tasks: row.get::<i64, _>("completed_tasks") as usize,
            total_tasks: row.get::<i64, _>("total_tasks") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let record = RunRecord::from(summary);
        let report = serde_json::to_string(summary).context("Failed to serialize run report")?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, status, started_at, completed_at, progress, completed_tasks, total_tasks, report)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.pipeline_name)
        .bind(format!("{:?}", record.status))
        .bind(Self::to_naive(record.started_at))
        .bind(record.completed_at.map(Self::to_naive))
        .bind(record.progress)
        .bind(record.completed_tasks as i64)
        .bind(record.total_tasks as i64)
        .bind(report)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query("SELECT report FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        match row {
            Some(row) => {
                let report: String = row.get("report");
                let summary = serde_json::from_str(&report)
                    .with_context(|| format!("Corrupt report for run {}", run_id))?;
                Ok(Some(summary))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pipeline_name, status, started_at, completed_at, progress, completed_tasks, total_tasks
            FROM runs
            WHERE pipeline_name = ?1
            ORDER BY started_at DESC
            "#,
        )
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}
