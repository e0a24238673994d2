//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Unknown paths answer with a JSON 404
async fn fallback_handler(uri: axum::http::Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(handlers::ApiError::new(format!(
            "No route for {}",
            uri.path()
        ))),
    )
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check, probed by peers during discovery
        .route("/api/server/health", get(handlers::health_check))
        // Submission
        .route("/api/send", post(handlers::send_email))
        .route("/api/emails/{id}", get(handlers::get_email))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}
