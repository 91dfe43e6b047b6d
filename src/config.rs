//! Configuration Module
//!
//! Handles loading and managing proxy configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::policy::HeuristicPolicy;
use crate::proxy::HandlerOptions;

/// Proxy configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Origin URL every request is forwarded to
    pub origin: String,
    /// Host header sent upstream instead of the client's
    pub host_header: Option<String>,
    /// Address to bind to
    pub listen: String,
    /// Store entries on disk instead of in memory
    pub use_disk: bool,
    /// Root directory of the disk store
    pub cache_dir: PathBuf,
    /// Private cache mode; shared when false
    pub private_cache: bool,
    /// Dump requests, responses and error bodies
    pub dump_http: bool,
    /// Debug logging
    pub verbose: bool,
    /// Memory store bound, 0 for unbounded
    pub max_entries: usize,
    /// Fraction of (Date - Last-Modified) used as heuristic lifetime
    pub heuristic_fraction: f64,
    /// Cap on the heuristic lifetime in seconds
    pub heuristic_max_secs: u64,
    /// Configured stale-on-error tolerance in seconds
    pub stale_if_error_secs: u64,
    /// Origin request timeout in seconds
    pub upstream_timeout_secs: u64,
    /// Interval in seconds between temp file sweeps
    pub sweep_interval_secs: u64,
    /// Largest request body accepted
    pub max_body_bytes: usize,
}

fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// Heuristic fractions outside 0.0..=1.0 are rejected.
fn heuristic_fraction(value: Option<f64>) -> Option<f64> {
    value.filter(|f| f.is_finite() && (0.0..=1.0).contains(f))
}

fn flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `ORIGIN` - Origin URL (default: http://127.0.0.1:80)
    /// - `HOST_HEADER` - Host header to send upstream (default: client's)
    /// - `LISTEN` - Bind address (default: 0.0.0.0:8080)
    /// - `USE_DISK` - Use the disk store (default: false)
    /// - `CACHE_DIR` - Disk store root (default: ./cachedata)
    /// - `PRIVATE_CACHE` - Private cache mode (default: false)
    /// - `DUMP_HTTP` - Dump HTTP traffic (default: false)
    /// - `VERBOSE` - Debug logging (default: false)
    /// - `MAX_ENTRIES` - Memory store bound (default: 0, unbounded)
    /// - `HEURISTIC_FRACTION` - Heuristic freshness fraction, 0.0 to 1.0 (default: 0.1)
    /// - `HEURISTIC_MAX_SECS` - Heuristic freshness cap (default: 86400)
    /// - `STALE_IF_ERROR_SECS` - Stale-on-error tolerance (default: 0)
    /// - `UPSTREAM_TIMEOUT_SECS` - Origin timeout (default: 30)
    /// - `SWEEP_INTERVAL_SECS` - Temp file sweep interval (default: 60)
    /// - `MAX_BODY_BYTES` - Request body limit (default: 64 MiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            origin: env::var("ORIGIN").unwrap_or(defaults.origin),
            host_header: env::var("HOST_HEADER").ok().filter(|h| !h.is_empty()),
            listen: env::var("LISTEN").unwrap_or(defaults.listen),
            use_disk: flag("USE_DISK").unwrap_or(defaults.use_disk),
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            private_cache: flag("PRIVATE_CACHE").unwrap_or(defaults.private_cache),
            dump_http: flag("DUMP_HTTP").unwrap_or(defaults.dump_http),
            verbose: flag("VERBOSE").unwrap_or(defaults.verbose),
            max_entries: var("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            heuristic_fraction: heuristic_fraction(var("HEURISTIC_FRACTION"))
                .unwrap_or(defaults.heuristic_fraction),
            heuristic_max_secs: var("HEURISTIC_MAX_SECS").unwrap_or(defaults.heuristic_max_secs),
            stale_if_error_secs: var("STALE_IF_ERROR_SECS")
                .unwrap_or(defaults.stale_if_error_secs),
            upstream_timeout_secs: var("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or(defaults.upstream_timeout_secs),
            sweep_interval_secs: var("SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            max_body_bytes: var("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
        }
    }

    /// Caching handler options derived from this configuration.
    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            shared: !self.private_cache,
            heuristic: HeuristicPolicy {
                fraction: self.heuristic_fraction,
                max: Duration::from_secs(self.heuristic_max_secs),
            },
            stale_if_error: Duration::from_secs(self.stale_if_error_secs),
            ..HandlerOptions::default()
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:80".to_string(),
            host_header: None,
            listen: "0.0.0.0:8080".to_string(),
            use_disk: false,
            cache_dir: PathBuf::from("./cachedata"),
            private_cache: false,
            dump_http: false,
            verbose: false,
            max_entries: 0,
            heuristic_fraction: 0.1,
            heuristic_max_secs: 86_400,
            stale_if_error_secs: 0,
            upstream_timeout_secs: 30,
            sweep_interval_secs: 60,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}
