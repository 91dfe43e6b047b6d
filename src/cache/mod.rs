//! Cache Module
//!
//! Entry model, key derivation and the two storage backends.

mod disk;
mod entry;
mod eviction;
mod key;
mod memory;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use disk::DiskStore;
pub use entry::{CacheEntry, HeaderList};
pub use eviction::EvictionQueue;
pub use key::{CacheKey, Vary};
pub use memory::MemoryStore;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::CacheStore;
