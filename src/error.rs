//! Error types for the caching proxy
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching proxy.
///
/// Store-side variants (`Io`, `Serialization`, `Corrupt`) only ever affect
/// cache efficiency and are absorbed by the handler. `Upstream` and
/// `GatewayTimeout` reach the client.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem failure in a store backend
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry metadata could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted entry exists but cannot be decoded
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// The origin forwarder failed (connect, timeout, malformed response)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// `only-if-cached` was requested and nothing servable is stored
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Inbound request could not be turned into an origin request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::Upstream(_) => StatusCode::BAD_GATEWAY,
            CacheError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Io(_)
            | CacheError::Serialization(_)
            | CacheError::Corrupt(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching proxy.
pub type Result<T> = std::result::Result<T, CacheError>;
