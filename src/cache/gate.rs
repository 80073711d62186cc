//! Cache gate with per-key in-flight deduplication

use crate::cache::CacheStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome published by the leader of an in-flight key
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseOutcome {
    Pending,
    Recorded(String),
    Abandoned,
}

type InFlight = Arc<Mutex<HashMap<String, watch::Sender<LeaseOutcome>>>>;

/// Result of consulting the cache for one key
#[derive(Debug)]
pub enum CacheDecision {
    /// Reuse this output reference; do not dispatch
    Hit(String),
    /// Dispatch, then settle the lease
    Miss(CacheLease),
}

/// Decides hit or miss and ensures at most one in-flight computation per key.
///
/// A requester that finds the key already leased waits for the leader. If the
/// leader records a result the waiter gets a hit; if the leader abandons, the
/// waiter tries again and may become the new leader.
#[derive(Clone)]
pub struct CacheGate {
    store: Arc<dyn CacheStore>,
    in_flight: InFlight,
}

impl CacheGate {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Keys currently leased by some requester
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub async fn check(&self, key: &str) -> CacheDecision {
        loop {
            let mut waiter = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(key) {
                    Some(leader) => leader.subscribe(),
                    None => {
                        let (tx, _) = watch::channel(LeaseOutcome::Pending);
                        in_flight.insert(key.to_string(), tx);
                        break;
                    }
                }
            };

            debug!(key, "Waiting for in-flight computation");
            let outcome = match waiter
                .wait_for(|o| *o != LeaseOutcome::Pending)
                .await
            {
                Ok(outcome) => outcome.clone(),
                Err(_) => LeaseOutcome::Abandoned,
            };

            if let LeaseOutcome::Recorded(output_ref) = outcome {
                return CacheDecision::Hit(output_ref);
            }
        }

        // This requester now leads the key
        let lease = CacheLease {
            key: key.to_string(),
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
            settled: false,
        };

        match self.store.get(key).await {
            Ok(Some(output_ref)) => {
                debug!(key, output_ref = %output_ref, "Cache hit");
                lease.settle(LeaseOutcome::Recorded(output_ref.clone()));
                CacheDecision::Hit(output_ref)
            }
            Ok(None) => {
                debug!(key, "Cache miss");
                CacheDecision::Miss(lease)
            }
            Err(e) => {
                warn!(key, error = %e, "Cache lookup failed, treating as miss");
                CacheDecision::Miss(lease)
            }
        }
    }
}

/// Exclusive right to compute one key. Dropping it unsettled abandons it.
pub struct CacheLease {
    key: String,
    store: Arc<dyn CacheStore>,
    in_flight: InFlight,
    settled: bool,
}

impl std::fmt::Debug for CacheLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLease")
            .field("key", &self.key)
            .field("settled", &self.settled)
            .finish()
    }
}

impl CacheLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store the result and release waiters with a hit.
    ///
    /// A failing store is logged; waiters still see the result.
    pub async fn record(mut self, output_ref: &str) {
        if let Err(e) = self.store.put(&self.key, output_ref).await {
            warn!(key = %self.key, error = %e, "Failed to record cache entry");
        }
        self.settle_in_place(LeaseOutcome::Recorded(output_ref.to_string()));
    }

    /// Release waiters without a result
    pub fn abandon(self) {
        self.settle(LeaseOutcome::Abandoned);
    }

    fn settle(mut self, outcome: LeaseOutcome) {
        self.settle_in_place(outcome);
    }

    fn settle_in_place(&mut self, outcome: LeaseOutcome) {
        if self.settled {
            return;
        }
        self.settled = true;

        let mut in_flight = lock(&self.in_flight);
        if let Some(tx) = in_flight.remove(&self.key) {
            tx.send_replace(outcome);
        }
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        self.settle_in_place(LeaseOutcome::Abandoned);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
