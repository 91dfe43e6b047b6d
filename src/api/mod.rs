//! API Module
//!
//! axum glue between inbound connections and the caching handler.

pub mod handlers;
pub mod routes;
mod traffic;

pub use handlers::{proxy_handler, AppState};
pub use routes::create_router;
