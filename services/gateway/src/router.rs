//! Axum Router Configuration

use crate::{handlers, search, state::AppState};
use axum::routing::{get, post};
use axum::Router;

/// Creates the main Axum router for the gateway.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/voice/token", post(handlers::mint_token))
        .route("/api/search/web", post(search::web_search))
        .route("/api/search/documents", post(search::document_search))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
