//! Task result caching
//!
//! A [`CacheGate`] sits in front of every cache-enabled dispatch. It derives
//! nothing itself; callers pass the key computed by [`cache_key`] and get a
//! [`CacheDecision`] back. Results live in a [`CacheStore`].

pub mod gate;
pub mod key;

#[cfg(feature = "sqlite")]
pub mod store;

pub use gate::{CacheDecision, CacheGate, CacheLease};
pub use key::{cache_key, completion_digest};

#[cfg(feature = "sqlite")]
pub use store::SqliteCacheStore;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Error from a cache backend. Never fatal to a run.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Storage for cache key -> output reference entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    async fn put(&self, key: &str, output_ref: &str) -> Result<(), CacheStoreError>;
}

/// In-memory cache store (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, output_ref: &str) -> Result<(), CacheStoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), output_ref.to_string());
        Ok(())
    }
}
