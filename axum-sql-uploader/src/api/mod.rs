//! REST API endpoints
//!
//! Thin JSON adapters over the [`Orchestrator`](crate::orchestrator::Orchestrator).

use axum::Router;
use std::sync::Arc;

use crate::orchestrator::Orchestrator;

pub mod connect;
pub mod upload;

// Re-export handlers for convenience
pub use connect::connect_handler;
pub use upload::upload_handler;

/// Create the API router with all endpoints
///
/// # Arguments
///
/// * `orchestrator` - Shared orchestrator running the connect and upload flows
///
/// # Returns
///
/// An Axum Router configured with all API routes
pub fn create_api_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/connect", axum::routing::post(connect::connect_handler))
        .route("/upload", axum::routing::post(upload::upload_handler))
        .with_state(orchestrator)
}
