//! Traffic Logger
//!
//! Middleware writing one access line per exchange, and, when dumping is
//! enabled, request and response heads plus error bodies.

use std::time::Instant;

use axum::{
    body::{to_bytes, Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

use super::handlers::AppState;
use crate::policy::headers::X_CACHE;

// Error bodies larger than this, or of unknown length, are not dumped.
const MAX_DUMPED_BODY: usize = 64 * 1024;

pub async fn log_traffic(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    if state.dump_http {
        info!(
            "request {} {} {:?}\n{}",
            method,
            uri,
            request.version(),
            format_headers(request.headers())
        );
    }

    let response = next.run(request).await;
    let status = response.status();
    let disposition = response
        .headers()
        .get(X_CACHE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        cache = %disposition,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "{} {} {}",
        method,
        uri,
        status.as_u16()
    );

    if !state.dump_http {
        return response;
    }

    info!(
        "response {} {}\n{}",
        status,
        uri,
        format_headers(response.headers())
    );
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    // the dump never changes what the client receives
    let Some(length) = body_length(&response) else {
        return response;
    };
    if length > MAX_DUMPED_BODY {
        warn!(length, "Error body too large to dump");
        return response;
    }

    let (parts, body) = response.into_parts();
    match to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let shown = &bytes[..bytes.len().min(MAX_DUMPED_BODY)];
            warn!("error body {} {}\n{}", status, uri, String::from_utf8_lossy(shown));
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            warn!(error = %e, "Failed to read error body");
            Response::from_parts(parts, Body::empty())
        }
    }
}

// Declared Content-Length, else the exact size the body reports.
fn body_length(response: &Response) -> Option<usize> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| {
            response
                .body()
                .size_hint()
                .exact()
                .and_then(|n| usize::try_from(n).ok())
        })
}

fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())))
        .collect::<Vec<_>>()
        .join("\n")
}
