//! SQLite-backed cache store

use crate::cache::{CacheStore, CacheStoreError};
use crate::persistence::{connect_sqlite, data_dir};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Cache entries persisted across runs
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = connect_sqlite(db_path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY,
                output_ref TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to initialize cache schema")?;

        Ok(Self { pool })
    }

    pub async fn with_default_path() -> Result<Self> {
        let db_path = data_dir()?.join("cache.db");
        Self::new(&db_path.to_string_lossy()).await
    }
}

fn backend_error(e: sqlx::Error) -> CacheStoreError {
    CacheStoreError::Backend(e.to_string())
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let row = sqlx::query("SELECT output_ref FROM cache_entries WHERE cache_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        Ok(row.map(|row| row.get("output_ref")))
    }

    async fn put(&self, key: &str, output_ref: &str) -> Result<(), CacheStoreError> {
        sqlx::query("INSERT OR REPLACE INTO cache_entries (cache_key, output_ref) VALUES (?1, ?2)")
            .bind(key)
            .bind(output_ref)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;

        Ok(())
    }
}
