//! API Handlers
//!
//! Turns inbound axum requests into origin requests for the caching handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::error::{CacheError, Result};
use crate::proxy::CachingHandler;
use crate::upstream::OriginRequest;

/// Application state shared across all requests.
#[derive(Clone)]
pub struct AppState {
    /// The caching handler every request is routed through
    pub handler: Arc<CachingHandler>,
    /// Largest request body buffered before forwarding
    pub max_body_bytes: usize,
    /// Dump request and response heads, and error bodies
    pub dump_http: bool,
}

impl AppState {
    pub fn new(handler: CachingHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            max_body_bytes: 64 * 1024 * 1024,
            dump_http: false,
        }
    }

    /// Creates the state from configuration around an existing handler.
    pub fn from_config(handler: CachingHandler, config: &crate::config::Config) -> Self {
        Self {
            handler: Arc::new(handler),
            max_body_bytes: config.max_body_bytes,
            dump_http: config.dump_http,
        }
    }
}

/// Fallback handler for every method and path.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let url = absolute_url(&parts)?;
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let body = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| CacheError::InvalidRequest(format!("reading request body: {}", e)))?;

    let origin_request = OriginRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
        peer,
    };
    let response = state.handler.handle(origin_request).await?;
    Ok(response.into_response())
}

// Rebuilds the absolute URL the client addressed, from the request target
// or the Host header.
fn absolute_url(parts: &Parts) -> Result<Url> {
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let host = match parts.uri.authority() {
        Some(authority) => authority.as_str().to_string(),
        None => parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CacheError::InvalidRequest("missing Host header".to_string()))?,
    };
    Url::parse(&format!("http://{}{}", host, path))
        .map_err(|e| CacheError::InvalidRequest(format!("invalid request target: {}", e)))
}
