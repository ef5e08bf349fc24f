use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Generation
            .route(
                "/queries/generate-and-execute",
                post(handlers::api::generate_and_execute),
            )
            .route("/queries/multi-candidate", post(handlers::api::multi_candidate))
            .route("/prompts/generate", post(handlers::api::generate_prompt))
            // Schema management
            .route("/database/schema", get(handlers::api::get_schema))
            .route("/database/change", post(handlers::api::change_database))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
