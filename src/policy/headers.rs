//! Header utilities shared by the handler and the forwarder

use std::collections::HashSet;
use std::time::SystemTime;

use axum::http::{header, HeaderMap, HeaderName};
use chrono::{DateTime, Utc};

use crate::cache::HeaderList;

/// Headers that describe a single connection and are never forwarded or stored.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Disposition header added to every response.
pub const X_CACHE: &str = "x-cache";

pub const WARNING_STALE: &str = "110 - \"Response is Stale\"";
pub const WARNING_REVALIDATION_FAILED: &str = "111 - \"Revalidation Failed\"";

// == HTTP dates ==
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(DateTime::<Utc>::from)
}

pub fn fmt_http_date(time: DateTime<Utc>) -> String {
    httpdate::fmt_http_date(SystemTime::from(time))
}

// == Hop-by-hop ==
/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

// == Conditional requests ==
const CLIENT_CONDITIONALS: [HeaderName; 5] = [
    header::IF_MATCH,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
    header::IF_UNMODIFIED_SINCE,
    header::IF_RANGE,
];

/// Removes client preconditions so the origin answers with a full,
/// storable response.
pub fn strip_client_conditionals(headers: &mut HeaderMap) {
    for name in CLIENT_CONDITIONALS {
        headers.remove(name);
    }
}

/// True when the client's `If-None-Match` / `If-Modified-Since` are
/// satisfied by a response carrying `response_headers`, so a 304 can be
/// returned instead of the body.
///
/// `If-None-Match` takes precedence; `If-Modified-Since` is only consulted
/// when it is absent.
pub fn client_not_modified(request_headers: &HeaderMap, response_headers: &HeaderList) -> bool {
    let inm: Vec<&str> = request_headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if !inm.is_empty() {
        let Some(etag) = response_headers.get("etag") else {
            return false;
        };
        return inm
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .any(|candidate| candidate == "*" || weak_eq(candidate, etag));
    }

    let since = request_headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);
    let modified = response_headers
        .get("last-modified")
        .and_then(parse_http_date);
    match (since, modified) {
        (Some(since), Some(modified)) => modified <= since,
        _ => false,
    }
}

// Weak comparison: opaque tags match regardless of the W/ prefix.
fn weak_eq(a: &str, b: &str) -> bool {
    let strip = |t: &str| t.trim().trim_start_matches("W/").to_string();
    strip(a) == strip(b)
}

// == 304 merge ==
// Never taken from a 304: it describes no body.
const NOT_UPDATED_BY_304: [&str; 1] = ["content-length"];

/// Applies the headers of a `304 Not Modified` over a stored header set.
///
/// Every header present in the 304 replaces all stored values of the same
/// name; single-valued replacements keep their original position.
pub fn merge_not_modified(stored: &HeaderList, not_modified: &HeaderList) -> HeaderList {
    let mut merged = stored.clone();
    let mut seen = HashSet::new();
    for (name, _) in not_modified.iter() {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str())
            || NOT_UPDATED_BY_304.contains(&lower.as_str())
            || lower == X_CACHE
            || !seen.insert(lower)
        {
            continue;
        }
        let values: Vec<&str> = not_modified.get_all(name).collect();
        if values.len() == 1 {
            merged.set(name, values[0]);
        } else {
            merged.remove(name);
            for value in values {
                merged.append(name, value);
            }
        }
    }
    merged
}
