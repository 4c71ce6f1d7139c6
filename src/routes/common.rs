//! Common routes: health and version.

use crate::response::success;
use axum::{response::IntoResponse, routing::get, Router};
use serde_json::json;

async fn health() -> impl IntoResponse {
    success("ok", json!({"status": "ok"}))
}

async fn version() -> impl IntoResponse {
    success(
        "ok",
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }),
    )
}

/// Stateless routes: GET /health, GET /version.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}
