//! Memory Store Module
//!
//! Process-lifetime store backed by a HashMap, optionally bounded by an
//! oldest-write eviction policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey, CacheStore, EvictionQueue};
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    order: EvictionQueue,
}

// == Memory Store ==
/// In-memory [`CacheStore`].
///
/// A single `RwLock` guards the map. Lookups share the read lock; `set` and
/// `delete` hold the write lock only for the map update, so a reader sees
/// either the old entry or the new one.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// Maximum number of entries, `None` = unbounded
    max_entries: Option<usize>,
    evictions: AtomicU64,
}

impl MemoryStore {
    // == Constructors ==
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_entries: None,
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a store holding at most `max_entries`; the entry with the
    /// oldest write is evicted to make room. Zero means unbounded.
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries: (max_entries > 0).then_some(max_entries),
            ..Self::new()
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Number of entries evicted by the capacity bound so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).cloned())
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        let mut inner = self.inner.write().await;

        let is_overwrite = inner.entries.contains_key(key);
        if let Some(max) = self.max_entries {
            while !is_overwrite && inner.entries.len() >= max {
                let Some(evicted) = inner.order.evict_oldest() else {
                    break;
                };
                inner.entries.remove(&evicted);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted, "evicted oldest entry");
            }
        }

        inner.entries.insert(key.clone(), entry);
        if self.max_entries.is_some() {
            inner.order.record_write(key);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.entries.remove(key).is_some() && self.max_entries.is_some() {
            inner.order.remove(key);
        }
        Ok(())
    }
}
