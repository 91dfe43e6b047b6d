//! httpcache_proxy - A caching HTTP reverse proxy
//!
//! Binary entry point: configuration, store selection, server lifecycle.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use httpcache_proxy::cache::{CacheStore, DiskStore, MemoryStore};
use httpcache_proxy::tasks::ABANDONED_AFTER;
use httpcache_proxy::upstream::HttpForwarder;
use httpcache_proxy::{create_router, spawn_cleanup_task, AppState, CachingHandler, Config};

/// Main entry point for the caching proxy.
///
/// # Startup Sequence
/// 1. Load configuration from environment variables
/// 2. Initialize tracing subscriber for logging
/// 3. Build the origin forwarder
/// 4. Create the memory or disk store, and the temp sweep task for disk
/// 5. Create the caching handler and Axum router
/// 6. Serve until SIGINT/SIGTERM, then log final statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // RUST_LOG overrides the defaults; VERBOSE raises them to debug
    let default_filter = if config.verbose {
        "httpcache_proxy=debug,tower_http=debug"
    } else {
        "httpcache_proxy=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting caching proxy");
    info!(
        "Configuration loaded: origin={}, listen={}, shared={}, disk={}",
        config.origin, config.listen, !config.private_cache, config.use_disk
    );

    let origin = Url::parse(&config.origin)
        .with_context(|| format!("invalid origin url {}", config.origin))?;
    let forwarder = HttpForwarder::new(
        origin,
        config.host_header.as_deref(),
        config.upstream_timeout(),
    )?;

    let mut sweeper = None;
    let store: Arc<dyn CacheStore> = if config.use_disk {
        create_cache_dir(&config.cache_dir)?;
        info!("Storing cached resources in {}", config.cache_dir.display());
        let disk = Arc::new(DiskStore::new(&config.cache_dir));
        sweeper = Some(spawn_cleanup_task(
            disk.clone(),
            config.sweep_interval_secs,
            ABANDONED_AFTER,
        ));
        disk
    } else {
        info!("Storing cached resources in memory");
        Arc::new(MemoryStore::bounded(config.max_entries))
    };

    let handler = CachingHandler::new(store, Arc::new(forwarder), config.handler_options());
    let stats = handler.stats();
    let app = create_router(AppState::from_config(handler, &config));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("Listening on http://{}", config.listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(sweeper))
    .await
    .context("server error")?;

    let snapshot = serde_json::to_string(&stats.snapshot())?;
    info!("Final cache statistics: {}", snapshot);
    info!("Server shutdown complete");
    Ok(())
}

/// Creates the disk store root, readable only by the current user on unix.
fn create_cache_dir(dir: &Path) -> anyhow::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .with_context(|| format!("creating cache dir {}", dir.display()))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(sweeper: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = sweeper {
        handle.abort();
        warn!("Temp sweep task aborted");
    }
}
