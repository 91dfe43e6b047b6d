//! HTTP Caching Policy
//!
//! Header interpretation shared by the caching handler: Cache-Control
//! directives, age and freshness, validators and header hygiene.

pub mod cache_control;
pub mod freshness;
pub mod headers;

pub use cache_control::{CacheControl, MaxStale};
pub use freshness::{current_age, freshness_lifetime, Freshness, HeuristicPolicy};
