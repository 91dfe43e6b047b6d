//! Cache Key Module
//!
//! Derives storage keys from method, absolute URL and the request header
//! values named by a stored response's `Vary`.

use std::fmt;

use axum::http::{HeaderMap, Method};
use url::Url;

use crate::cache::entry::HeaderList;

// == Vary ==
/// Parsed `Vary` declaration of a stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vary {
    /// No Vary header: the base identity is the whole key
    None,
    /// `Vary: *` or an unparseable value: never servable from cache
    Any,
    /// Lowercased, sorted, de-duplicated request header names
    Headers(Vec<String>),
}

impl Vary {
    /// Parses a comma separated Vary value. `None` means the header is absent.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Vary::None;
        };

        let mut names = Vec::new();
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "*" || !is_token(token) {
                return Vary::Any;
            }
            names.push(token.to_ascii_lowercase());
        }

        if names.is_empty() {
            return Vary::None;
        }
        names.sort();
        names.dedup();
        Vary::Headers(names)
    }

    /// Reads every `Vary` line of a stored header list.
    pub fn from_headers(headers: &HeaderList) -> Self {
        Self::parse(headers.joined("vary").as_deref())
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Vary::Any)
    }
}

// RFC 9110 token characters
fn is_token(s: &str) -> bool {
    s.bytes().all(|b| {
        b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'!' | b'#'
                    | b'$'
                    | b'%'
                    | b'&'
                    | b'\''
                    | b'*'
                    | b'+'
                    | b'-'
                    | b'.'
                    | b'^'
                    | b'_'
                    | b'`'
                    | b'|'
                    | b'~'
            )
    })
}

// == Cache Key ==
/// Opaque identity of a cacheable request variant.
///
/// The base identity is `METHOD absolute-url`. Variant keys append one line
/// per Vary header name: `name:value` when the request carried the header,
/// bare `name` when it did not, so an absent header never collides with an
/// empty one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Base identity for `method` and `url`, ignoring any Vary.
    pub fn base(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!(
            "{} {}",
            method.as_str().to_ascii_uppercase(),
            url.as_str()
        ))
    }

    /// Builds the key for a request.
    ///
    /// `prior_vary` is the Vary declaration of the entry stored under the
    /// base identity, or `None` when nothing is stored there yet.
    pub fn build(
        method: &Method,
        url: &Url,
        prior_vary: Option<&Vary>,
        request_headers: &HeaderMap,
    ) -> Self {
        let base = Self::base(method, url);
        match prior_vary {
            Some(vary) => base.variant(vary, request_headers),
            None => base,
        }
    }

    /// Extends this key with the request header values named by `vary`.
    pub fn variant(&self, vary: &Vary, request_headers: &HeaderMap) -> Self {
        match vary {
            Vary::None => self.clone(),
            Vary::Any => Self(format!("{}\n*", self.0)),
            Vary::Headers(names) => {
                let mut key = self.0.clone();
                for name in names {
                    key.push('\n');
                    key.push_str(name);
                    if let Some(value) = normalized_header_value(request_headers, name) {
                        key.push(':');
                        key.push_str(&value);
                    }
                }
                Self(key)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Values of every line of `name`, trimmed, lowercased and comma joined.
fn normalized_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let mut values = headers.get_all(name).iter().peekable();
    values.peek()?;
    let joined = values
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(", ");
    Some(joined)
}
