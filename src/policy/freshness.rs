//! Age and freshness computation for stored entries

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::policy::cache_control::{CacheControl, MaxStale, DELTA_SECONDS_OVERFLOW_VALUE};
use crate::policy::headers::parse_http_date;

/// Statuses that may be given a heuristic lifetime without explicit freshness.
pub const HEURISTICALLY_CACHEABLE: [u16; 11] =
    [200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

fn non_negative(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

// == Heuristic ==
/// Lifetime assigned to responses without `max-age` or `Expires`:
/// `fraction` of the time between `Last-Modified` and `Date`, capped at
/// `max`. Responses without `Last-Modified` get no heuristic lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicPolicy {
    pub fraction: f64,
    pub max: Duration,
}

impl Default for HeuristicPolicy {
    fn default() -> Self {
        Self {
            fraction: 0.1,
            max: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl HeuristicPolicy {
    pub fn lifetime(&self, entry: &CacheEntry, cc: &CacheControl) -> Duration {
        if !self.fraction.is_finite() || self.fraction <= 0.0 {
            return Duration::ZERO;
        }
        if !HEURISTICALLY_CACHEABLE.contains(&entry.status) && !cc.public() {
            return Duration::ZERO;
        }
        let Some(last_modified) = entry.last_modified().and_then(parse_http_date) else {
            return Duration::ZERO;
        };
        let date = entry.date().unwrap_or(entry.response_time);
        let scaled = non_negative(date - last_modified).as_secs_f64() * self.fraction;
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

// == Age ==
/// Current age of a stored entry at `now`.
///
/// The initial age is the larger of the apparent age (`response_time`
/// minus `Date`) and the origin `Age` header corrected by the round trip
/// delay; the time the entry has spent in the store is added to it.
pub fn current_age(entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
    let date = entry.date().unwrap_or(entry.response_time);
    let apparent_age = non_negative(entry.response_time - date);

    // origin supplied, so clamped like any other delta-seconds value
    let age_value = entry
        .headers
        .get("age")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(DELTA_SECONDS_OVERFLOW_VALUE)))
        .unwrap_or_default();
    let response_delay = non_negative(entry.response_time - entry.request_time);
    let corrected_age_value = age_value.saturating_add(response_delay);

    let resident_time = non_negative(now - entry.response_time);
    apparent_age
        .max(corrected_age_value)
        .saturating_add(resident_time)
}

// == Lifetime ==
/// Freshness lifetime of a stored entry.
///
/// `s-maxage` (shared mode only), then `max-age`, then `Expires` minus
/// `Date`, then the heuristic.
pub fn freshness_lifetime(
    entry: &CacheEntry,
    cc: &CacheControl,
    shared: bool,
    heuristic: &HeuristicPolicy,
) -> Duration {
    if shared {
        if let Some(s_maxage) = cc.s_maxage() {
            return Duration::from_secs(s_maxage);
        }
    }
    if let Some(max_age) = cc.max_age() {
        return Duration::from_secs(max_age);
    }
    if let Some(expires) = entry.headers.get("expires") {
        // an invalid Expires means already expired
        let Some(expires) = parse_http_date(expires) else {
            return Duration::ZERO;
        };
        let date = entry.date().unwrap_or(entry.response_time);
        return non_negative(expires - date);
    }
    heuristic.lifetime(entry, cc)
}

// == Freshness ==
/// Age and lifetime of an entry at one instant, plus its directives.
#[derive(Debug, Clone)]
pub struct Freshness {
    pub age: Duration,
    pub lifetime: Duration,
    pub directives: CacheControl,
    shared: bool,
}

impl Freshness {
    pub fn evaluate(
        entry: &CacheEntry,
        now: DateTime<Utc>,
        shared: bool,
        heuristic: &HeuristicPolicy,
    ) -> Self {
        let directives = CacheControl::from_headers(&entry.headers);
        Self {
            age: current_age(entry, now),
            lifetime: freshness_lifetime(entry, &directives, shared, heuristic),
            directives,
            shared,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.lifetime > self.age
    }

    /// How far past its lifetime the entry is; zero while fresh.
    pub fn staleness(&self) -> Duration {
        self.age.saturating_sub(self.lifetime)
    }

    /// Value for the `Age` response header, rounded up to whole seconds.
    pub fn age_secs(&self) -> u64 {
        let secs = self.age.as_secs();
        if self.age.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    }

    // stored directives that forbid serving stale
    fn forbids_stale(&self) -> bool {
        self.directives.must_revalidate()
            || (self.shared && (self.directives.proxy_revalidate() || self.directives.s_maxage().is_some()))
    }

    // == Request checks ==
    /// Whether the entry may be served without contacting the origin,
    /// given the request's own directives.
    pub fn satisfies(&self, request: &CacheControl) -> bool {
        if request.no_cache() || self.directives.no_cache() {
            return false;
        }
        if let Some(max_age) = request.max_age() {
            if self.age > Duration::from_secs(max_age) {
                return false;
            }
        }
        if self.is_fresh() {
            return match request.min_fresh() {
                Some(min_fresh) => self.lifetime - self.age >= Duration::from_secs(min_fresh),
                None => true,
            };
        }
        if self.forbids_stale() {
            return false;
        }
        match request.max_stale() {
            Some(MaxStale::Any) => true,
            Some(MaxStale::Seconds(limit)) => self.staleness() <= Duration::from_secs(limit),
            None => false,
        }
    }

    /// Whether the entry may stand in for a failed origin fetch.
    ///
    /// An explicit `stale-if-error` on the response or the request sets the
    /// window; otherwise the configured tolerance applies unless the entry
    /// forbids serving stale. A zero tolerance disables the fallback.
    pub fn permits_stale_on_error(&self, request: &CacheControl, tolerance: Duration) -> bool {
        let explicit = match (self.directives.stale_if_error(), request.stale_if_error()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(window) = explicit {
            return self.staleness() <= Duration::from_secs(window);
        }
        if tolerance.is_zero() || self.forbids_stale() {
            return false;
        }
        self.staleness() <= tolerance
    }
}
