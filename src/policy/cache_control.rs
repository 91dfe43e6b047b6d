//! Cache-Control parsing
//!
//! Directive names are case-insensitive; values may be tokens or quoted
//! strings. Only the directives that drive shared/private caching decisions
//! get typed accessors.

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::cache::HeaderList;

/// Delta-seconds values that overflow are clamped to 2^31.
pub const DELTA_SECONDS_OVERFLOW_VALUE: u64 = 2_147_483_648;

/// The `max-stale` request directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxStale {
    /// `max-stale` without a value: any staleness is acceptable
    Any,
    Seconds(u64),
}

/// Parsed Cache-Control directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: HashMap<String, Option<String>>,
}

impl CacheControl {
    /// Parses one or more comma separated directive lists.
    pub fn parse(value: &str) -> Self {
        let mut directives = HashMap::new();
        for part in split_outside_quotes(value) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = match part.split_once('=') {
                Some((name, value)) => (name.trim(), Some(unquote(value.trim()).to_string())),
                None => (part, None),
            };
            if name.is_empty() {
                continue;
            }
            // the first occurrence wins
            directives
                .entry(name.to_ascii_lowercase())
                .or_insert(value);
        }
        Self { directives }
    }

    /// Parses every `Cache-Control` line of a live header map.
    pub fn from_header_map(headers: &HeaderMap) -> Option<Self> {
        let lines: Vec<String> = headers
            .get_all("cache-control")
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(Self::parse(&lines.join(",")))
        }
    }

    /// Request directives, treating `Pragma: no-cache` as `no-cache` when
    /// the request carries no Cache-Control.
    pub fn from_request(headers: &HeaderMap) -> Self {
        if let Some(cc) = Self::from_header_map(headers) {
            return cc;
        }
        let pragma_no_cache = headers.get_all("pragma").iter().any(|v| {
            v.to_str()
                .map(|s| s.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-cache")))
                .unwrap_or(false)
        });
        if pragma_no_cache {
            Self::parse("no-cache")
        } else {
            Self::default()
        }
    }

    /// Directives of a stored response.
    pub fn from_headers(headers: &HeaderList) -> Self {
        headers
            .joined("cache-control")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    fn delta_seconds(&self, name: &str) -> Option<Option<u64>> {
        let value = self.directives.get(name)?;
        Some(value.as_deref().and_then(parse_delta_seconds))
    }

    // Lifetime directives with a missing or invalid value make the response stale.
    fn lifetime_seconds(&self, name: &str) -> Option<u64> {
        self.delta_seconds(name).map(|v| v.unwrap_or(0))
    }

    // == Boolean directives ==
    pub fn no_store(&self) -> bool {
        self.has("no-store")
    }

    pub fn no_cache(&self) -> bool {
        self.has("no-cache")
    }

    pub fn private(&self) -> bool {
        self.has("private")
    }

    pub fn public(&self) -> bool {
        self.has("public")
    }

    pub fn must_revalidate(&self) -> bool {
        self.has("must-revalidate")
    }

    pub fn proxy_revalidate(&self) -> bool {
        self.has("proxy-revalidate")
    }

    pub fn only_if_cached(&self) -> bool {
        self.has("only-if-cached")
    }

    // == Delta-seconds directives ==
    pub fn max_age(&self) -> Option<u64> {
        self.lifetime_seconds("max-age")
    }

    pub fn s_maxage(&self) -> Option<u64> {
        self.lifetime_seconds("s-maxage")
    }

    pub fn min_fresh(&self) -> Option<u64> {
        self.delta_seconds("min-fresh").flatten()
    }

    pub fn stale_if_error(&self) -> Option<u64> {
        self.delta_seconds("stale-if-error").flatten()
    }

    pub fn max_stale(&self) -> Option<MaxStale> {
        match self.directives.get("max-stale")? {
            None => Some(MaxStale::Any),
            Some(value) => parse_delta_seconds(value).map(MaxStale::Seconds),
        }
    }
}

fn parse_delta_seconds(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(
        value
            .parse::<u64>()
            .map(|v| v.min(DELTA_SECONDS_OVERFLOW_VALUE))
            .unwrap_or(DELTA_SECONDS_OVERFLOW_VALUE),
    )
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn split_outside_quotes(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}
