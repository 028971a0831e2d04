//! HTTP service for per-tenant resource sessions.
//!
//! This server:
//! - Opens tenant sessions on demand for each request
//! - Rolls back, closes and disposes them when the request completes
//! - Force-closes every session and redirects to the error page on unhandled errors

use std::sync::Arc;

use clap::Parser;
use tenant_session_core::TracingErrorLogger;
use tenant_session_web::config::Config;
use tenant_session_web::handlers::AppState;
use tenant_session_web::memory::MemoryStore;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting tenant-session-web v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    match &config.site_url {
        Some(url) => info!("  Error page base: {}", url),
        None => info!("  Error page base: request Host header"),
    }

    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(TracingErrorLogger),
        config.site_url.clone(),
    );
    let lifecycle = Arc::clone(&state.lifecycle);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = tenant_session_web::app(state).layer(cors);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = lifecycle.close_all().await;
    if report.sessions > 0 {
        info!("Closed {} leftover session(s) at shutdown", report.sessions);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
