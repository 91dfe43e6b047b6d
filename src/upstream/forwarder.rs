//! HTTP Forwarder
//!
//! Routes requests to a single configured origin with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::{CacheError, Result};
use crate::policy::headers::strip_hop_by_hop;
use crate::upstream::{OriginForwarder, OriginRequest, OriginResponse};

/// Forwards every request to `origin`, keeping the client's path and query.
///
/// Redirects are returned to the client, never followed.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    origin: Url,
    host: Option<HeaderValue>,
}

impl HttpForwarder {
    /// Creates a forwarder for `origin`.
    ///
    /// # Arguments
    /// * `origin` - Base URL; its path is used as a prefix for every request
    /// * `host` - Host header to send instead of the client's
    /// * `timeout` - Limit for a whole origin exchange
    pub fn new(origin: Url, host: Option<&str>, timeout: Duration) -> Result<Self> {
        if origin.cannot_be_a_base() || origin.host_str().is_none() {
            return Err(CacheError::InvalidRequest(format!(
                "origin must be an absolute http(s) URL: {}",
                origin
            )));
        }
        let host = host
            .map(|h| {
                HeaderValue::from_str(h)
                    .map_err(|_| CacheError::InvalidRequest(format!("invalid host header: {}", h)))
            })
            .transpose()?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Internal(format!("building http client: {}", e)))?;

        Ok(Self {
            client,
            origin,
            host,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Maps a client URL onto the origin.
    pub fn target_url(&self, url: &Url) -> Url {
        let mut target = self.origin.clone();
        target.set_path(&join_paths(self.origin.path(), url.path()));
        target.set_query(url.query());
        target.set_fragment(None);
        target
    }
}

// Cleaned join of the origin prefix and the request path; a trailing slash
// on the request path survives.
fn join_paths(prefix: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in prefix.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut joined = format!("/{}", segments.join("/"));
    if path.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: std::net::IpAddr) {
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        peer.to_string()
    } else {
        format!("{}, {}", prior.join(", "), peer)
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

#[async_trait]
impl OriginForwarder for HttpForwarder {
    async fn forward(&self, request: OriginRequest) -> Result<OriginResponse> {
        let target = self.target_url(&request.url);
        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        if let Some(host) = &self.host {
            headers.insert(header::HOST, host.clone());
        }
        if let Some(peer) = request.peer {
            append_forwarded_for(&mut headers, peer);
        }

        debug!(method = %request.method, target = %target, "Forwarding to origin");
        let mut builder = self.client.request(request.method, target).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(upstream_error)?;
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await.map_err(upstream_error)?;

        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }
}

fn upstream_error(err: reqwest::Error) -> CacheError {
    if err.is_timeout() {
        CacheError::Upstream(format!("origin timed out: {}", err))
    } else {
        CacheError::Upstream(err.to_string())
    }
}
