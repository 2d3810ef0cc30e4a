use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, search_handler, upload_handler};
use super::AppState;

/// Routes of the HTTP surface.
///
/// CORS is fully permissive; editor extensions call from arbitrary origins.
pub fn build_router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/upload-folder", post(upload_handler))
        .route("/semantic-search", post(search_handler))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
