//! Cache Statistics Module
//!
//! Counts request dispositions and store failures.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::proxy::Outcome;

// == Cache Stats ==
/// Process-wide disposition counters, updated without locking.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    revalidated: AtomicU64,
    stale_served: AtomicU64,
    bypassed: AtomicU64,
    store_errors: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub revalidated: u64,
    pub stale_served: u64,
    pub bypassed: u64,
    pub store_errors: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Record ==
    /// Counts one completed exchange.
    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Hit => &self.hits,
            Outcome::Miss => &self.misses,
            Outcome::Revalidated => &self.revalidated,
            Outcome::StaleServed => &self.stale_served,
            Outcome::Bypass => &self.bypassed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Reads all counters.
    ///
    /// The hit rate counts revalidated and stale responses as served from
    /// cache; bypassed requests are excluded.
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let revalidated = self.revalidated.load(Ordering::Relaxed);
        let stale_served = self.stale_served.load(Ordering::Relaxed);

        let from_cache = hits + revalidated + stale_served;
        let total = from_cache + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            from_cache as f64 / total as f64
        };

        StatsSnapshot {
            hits,
            misses,
            revalidated,
            stale_served,
            bypassed: self.bypassed.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}
