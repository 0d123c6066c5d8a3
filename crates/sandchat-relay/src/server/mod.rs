//! HTTP server: routes, error responses, and SSE framing.

pub mod error;
pub mod routes;
pub mod sse;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::relay::Relay;
use crate::shell::ShellService;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub shell: Arc<ShellService>,
}

impl AppState {
    pub fn new(relay: Relay, shell: ShellService) -> Self {
        Self {
            relay: Arc::new(relay),
            shell: Arc::new(shell),
        }
    }
}

/// Build the router. Unsupported methods on known paths get 405.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/chat", post(routes::chat))
        .route("/shell", post(routes::shell))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
