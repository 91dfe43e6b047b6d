//! httpcache_proxy - A caching HTTP reverse proxy
//!
//! Serves origin responses from a memory or disk store according to HTTP
//! caching rules, in shared or private cache mode.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod policy;
pub mod proxy;
pub mod tasks;
pub mod upstream;

pub use api::{create_router, AppState};
pub use config::Config;
pub use proxy::{CachingHandler, HandlerOptions};
pub use tasks::spawn_cleanup_task;
