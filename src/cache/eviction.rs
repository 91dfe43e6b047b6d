//! Eviction Queue Module
//!
//! Write-order tracking used to bound the memory store.

use std::collections::VecDeque;

use crate::cache::CacheKey;

// == Eviction Queue ==
/// Tracks keys in the order they were last written.
///
/// Keys are stored in a VecDeque where:
/// - Front = Most recently written
/// - Back = Oldest write, next eviction candidate
///
/// Reads do not reorder keys, so lookups never need exclusive access.
#[derive(Debug, Default)]
pub struct EvictionQueue {
    order: VecDeque<CacheKey>,
}

impl EvictionQueue {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Record Write ==
    /// Marks a key as just written (moves to front).
    pub fn record_write(&mut self, key: &CacheKey) {
        self.remove(key);
        self.order.push_front(key.clone());
    }

    pub fn remove(&mut self, key: &CacheKey) {
        self.order.retain(|k| k != key);
    }

    // == Evict Oldest ==
    /// Returns and removes the key with the oldest write.
    pub fn evict_oldest(&mut self) -> Option<CacheKey> {
        self.order.pop_back()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[cfg(test)]
    fn peek_oldest(&self) -> Option<&CacheKey> {
        self.order.back()
    }
}
