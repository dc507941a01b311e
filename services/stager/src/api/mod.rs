//! HTTP API handlers and routing.

pub mod error;
mod health;
mod staging;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use health::{ComponentHealth, ComponentStatus, HealthResponse};
pub use staging::StageRequest;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Probes
        .merge(health::routes())
        .nest("/v1", staging::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
