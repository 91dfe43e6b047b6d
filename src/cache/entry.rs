//! Cache Entry Module
//!
//! Defines a stored response: status, ordered headers, body and the
//! timestamps used for age computation.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::key::Vary;
use crate::policy::headers::{fmt_http_date, merge_not_modified, parse_http_date};

// == Header List ==
/// Ordered, multi-valued header list.
///
/// Names compare case-insensitively but keep the casing and order they
/// arrived with, so a stored response replays the way it was received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Copies every header line out of an `http` header map.
    ///
    /// Values that are not valid UTF-8 are converted lossily.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let pairs = map
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self(pairs)
    }

    /// Builds an `http` header map, skipping lines that are not valid HTTP.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Returns the first value for `name`.
    pub fn get<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values for `name` joined as a comma separated list.
    pub fn joined(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self.get_all(name).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Appends a header line after the existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with a single value.
    ///
    /// The new line takes the position of the first existing line, or is
    /// appended if the header was absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(pos) => {
                self.0[pos].1 = value;
                let mut index = 0;
                self.0.retain(|(n, _)| {
                    let keep = index <= pos || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.0.push((name.to_string(), value)),
        }
    }

    /// Removes every line for `name`.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

// == Cache Entry ==
/// A stored origin response.
///
/// Entries are never mutated in place. Revalidation produces a new entry
/// through [`CacheEntry::revalidated`] that shares the body buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// HTTP status code of the stored response
    pub status: u16,
    /// Response headers in arrival order
    pub headers: HeaderList,
    /// Response body; persisted separately from the metadata on disk
    #[serde(skip)]
    pub body: Bytes,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// When the request that produced this response was sent upstream
    pub request_time: DateTime<Utc>,
    /// When the response arrived from upstream
    pub response_time: DateTime<Utc>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry from an origin round trip bracketed by
    /// `request_time` and `response_time`.
    pub fn new(
        status: u16,
        headers: HeaderList,
        body: Bytes,
        request_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: Utc::now(),
            request_time,
            response_time,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    // == Validators ==
    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.headers.get("last-modified")
    }

    /// True when the entry can be revalidated with a conditional request.
    pub fn has_validators(&self) -> bool {
        self.etag().is_some() || self.last_modified().is_some()
    }

    /// Parsed `Date` header, if present and valid.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.headers.get("date").and_then(parse_http_date)
    }

    /// Vary declaration of the stored response.
    pub fn vary(&self) -> Vary {
        Vary::from_headers(&self.headers)
    }

    // == Revalidation ==
    /// Produces the replacement entry for a `304 Not Modified`.
    ///
    /// Headers from the 304 win over stored ones; the body is reused and
    /// the timestamps move to the revalidation round trip.
    pub fn revalidated(
        &self,
        not_modified: &HeaderList,
        request_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Self {
        let mut headers = merge_not_modified(&self.headers, not_modified);
        // the stored Age and Date describe the previous round trip
        if !not_modified.contains("age") {
            headers.remove("age");
        }
        if !not_modified.contains("date") {
            headers.set("date", fmt_http_date(response_time));
        }
        Self::new(
            self.status,
            headers,
            self.body.clone(),
            request_time,
            response_time,
        )
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_entry() -> CacheEntry {
        let now = Utc::now();
        let headers: HeaderList = vec![
            ("Content-Type", "text/plain"),
            ("ETag", "\"v1\""),
            ("Cache-Control", "max-age=60"),
        ]
        .into_iter()
        .collect();
        CacheEntry::new(200, headers, Bytes::from_static(b"hello"), now, now)
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let entry = sample_entry();
        assert_eq!(entry.headers.get("content-type"), Some("text/plain"));
        assert_eq!(entry.headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(entry.headers.contains("etag"));
    }

    #[test]
    fn test_header_value_outlives_lookup_name() {
        let entry = sample_entry();
        let value = {
            let name = String::from("ETag");
            entry.headers.get(&name)
        };
        assert_eq!(value, Some("\"v1\""));
    }

    #[test]
    fn test_header_set_replaces_in_place() {
        let mut headers: HeaderList = vec![("A", "1"), ("B", "2"), ("a", "3")]
            .into_iter()
            .collect();
        headers.set("a", "9");

        let pairs: Vec<(&str, &str)> = headers.iter().collect();
        assert_eq!(pairs, vec![("A", "9"), ("B", "2")]);
    }

    #[test]
    fn test_header_joined() {
        let headers: HeaderList = vec![("Vary", "Accept"), ("vary", "Accept-Encoding")]
            .into_iter()
            .collect();
        assert_eq!(
            headers.joined("vary").as_deref(),
            Some("Accept, Accept-Encoding")
        );
        assert!(headers.joined("missing").is_none());
    }

    #[test]
    fn test_header_map_round_trip_keeps_multiple_values() {
        let headers: HeaderList = vec![("set-cookie", "a=1"), ("set-cookie", "b=2")]
            .into_iter()
            .collect();
        let map = headers.to_header_map();
        assert_eq!(map.get_all("set-cookie").iter().count(), 2);
        assert_eq!(HeaderList::from_header_map(&map).len(), 2);
    }

    #[test]
    fn test_validators() {
        let entry = sample_entry();
        assert_eq!(entry.etag(), Some("\"v1\""));
        assert!(entry.last_modified().is_none());
        assert!(entry.has_validators());
    }

    #[test]
    fn test_revalidated_keeps_body_and_resets_times() {
        let mut entry = sample_entry();
        entry.request_time = Utc::now() - Duration::seconds(300);
        entry.response_time = entry.request_time;

        let fresh: HeaderList = vec![("Cache-Control", "max-age=120"), ("ETag", "\"v1\"")]
            .into_iter()
            .collect();
        let now = Utc::now();
        let updated = entry.revalidated(&fresh, now, now);

        assert_eq!(updated.body, entry.body);
        assert_eq!(updated.status, 200);
        assert_eq!(updated.headers.get("cache-control"), Some("max-age=120"));
        assert_eq!(updated.headers.get("content-type"), Some("text/plain"));
        assert_eq!(updated.response_time, now);
        assert!(updated.date().is_some());
        // the original is untouched
        assert_eq!(entry.headers.get("cache-control"), Some("max-age=60"));
    }

    #[test]
    fn test_metadata_serialization_skips_body() {
        let entry = sample_entry();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("hello"));

        let decoded: CacheEntry = serde_json::from_str(&json).unwrap();
        assert!(decoded.body.is_empty());
        assert_eq!(decoded.headers, entry.headers);
        assert_eq!(decoded.response_time, entry.response_time);
    }
}
