//! Resource routes. `kind` is one of catalog, comment, group, item; `table` is the resource token.

use crate::handlers::resource::{create, delete, delete_by_query, find, find_all, find_by_slug, update};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:kind/:table", get(find_all).post(create).delete(delete_by_query))
        .route("/:kind/:table/slug/:slug", get(find_by_slug))
        .route("/:kind/:table/:id", get(find).put(update).delete(delete))
        .with_state(state)
}
