//! API Routes
//!
//! Every request, whatever its method or path, is proxied.

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{proxy_handler, AppState};
use super::traffic::log_traffic;

/// Creates the proxy router.
///
/// # Middleware
/// - Traffic logger: access lines, and dumps when enabled
/// - Tracing: request spans for debugging
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(state.clone(), log_traffic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
