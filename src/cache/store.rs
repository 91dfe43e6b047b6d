//! Cache Store Module
//!
//! The storage contract every backend implements.

use async_trait::async_trait;

use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;

// == Cache Store ==
/// Key/value persistence of cache entries.
///
/// Implementations must be safe under unbounded concurrent callers. A `set`
/// is atomic with respect to concurrent `get`s of the same key: readers see
/// either the previous entry or the new one, never a mix.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Looks up the entry stored under `key`.
    ///
    /// `Ok(None)` is a plain miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Stores `entry` under `key`, replacing any previous entry.
    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()>;

    /// Removes everything stored under `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &CacheKey) -> Result<()>;
}
