//! Per-tenant resource session lifecycle over HTTP.
//!
//! Each request gets a `RequestScope` that opens tenant sessions on demand.
//! When the request completes, every session it opened has its transaction
//! rolled back if still active, and is closed and disposed. An unhandled
//! error force-closes every tracked session in the process and redirects the
//! client to the error page.

pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod memory;
pub mod middleware;
pub mod registry;
pub mod tracker;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use handlers::{
    check_password, delete_record, error_page, get_policy, get_record, health_handler,
    put_policy, put_record, AppState,
};
use memory::MemoryStore;
use middleware::session_lifecycle_middleware;

/// Routes served by the application, before the lifecycle middleware is applied.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/tenants/{code}/records/{key}",
            get(get_record).put(put_record).delete(delete_record),
        )
        .route("/tenants/{code}/policy", get(get_policy).put(put_policy))
        .route("/tenants/{code}/policy/check", post(check_password))
        .route("/Error/", get(error_page))
}

/// Wrap `routes` with the session lifecycle middleware and HTTP tracing.
pub fn with_session_lifecycle(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.lifecycle),
            session_lifecycle_middleware::<MemoryStore>,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The full application router.
pub fn app(state: AppState) -> Router {
    with_session_lifecycle(routes(), state)
}
