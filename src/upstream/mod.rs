//! Upstream Module
//!
//! The origin side of the proxy: request/response types exchanged with the
//! origin and the forwarder contract the caching handler depends on.

mod forwarder;

use std::net::IpAddr;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use url::Url;

use crate::error::Result;

pub use forwarder::HttpForwarder;

// == Origin Request ==
/// A fully buffered request on its way to the origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    /// Absolute URL as the client addressed it
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Address of the connected client, when known
    pub peer: Option<IpAddr>,
}

impl OriginRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer: None,
        }
    }
}

// == Origin Response ==
/// A fully buffered response, from the origin or rebuilt from the store.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for OriginResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// == Origin Forwarder ==
/// Sends requests to the origin.
///
/// The caching handler performs no URL rewriting; implementations decide
/// where a request is routed.
#[async_trait]
pub trait OriginForwarder: Send + Sync {
    /// Returns the origin's response, or `CacheError::Upstream` when none
    /// could be obtained.
    async fn forward(&self, request: OriginRequest) -> Result<OriginResponse>;
}
