//! Proxy Module
//!
//! The caching decision engine and its construction options.

mod disposition;
mod handler;
mod options;

pub use disposition::{Disposition, DispositionObserver, Outcome};
pub use handler::CachingHandler;
pub use options::{HandlerOptions, StorePolicy};
