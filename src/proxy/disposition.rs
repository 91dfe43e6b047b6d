//! Disposition Module
//!
//! What the handler did with a request, and an optional hook that receives
//! one record per completed exchange.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheKey;

// == Outcome ==
/// Terminal state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Served from the store without contacting the origin
    Hit,
    /// Forwarded to the origin
    Miss,
    /// Confirmed by a `304` from the origin and served from the store
    Revalidated,
    /// Served stale because the origin failed
    StaleServed,
    /// Never looked up, forwarded verbatim
    Bypass,
}

impl Outcome {
    /// Value of the `X-Cache` response header.
    pub fn header_value(self) -> &'static str {
        match self {
            Outcome::Hit => "HIT",
            Outcome::Miss => "MISS",
            Outcome::Revalidated => "REVALIDATED",
            Outcome::StaleServed => "STALE",
            Outcome::Bypass => "SKIP",
        }
    }

    pub fn from_cache(self) -> bool {
        matches!(
            self,
            Outcome::Hit | Outcome::Revalidated | Outcome::StaleServed
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}

// == Disposition ==
/// Record emitted for every completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    pub key: CacheKey,
    pub outcome: Outcome,
    /// Time spent waiting on the origin, if it was contacted
    pub origin_latency: Option<Duration>,
    /// Age in seconds of the entry served from the store
    pub age: Option<u64>,
}

/// Receives disposition records, e.g. for metrics.
///
/// Called inline on the request path, so implementations should not block.
pub trait DispositionObserver: Send + Sync {
    fn observe(&self, disposition: &Disposition);
}
