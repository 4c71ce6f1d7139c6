//! Resource SDK: configuration-driven REST resources over relational tables.
//!
//! Each resource's fields, relations, filters and validation rules live in JSON documents under
//! the settings directory; one set of handlers serves every table.

pub mod config;
pub mod error;
pub mod inflect;
pub mod resource;
pub mod response;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;
pub mod service;
pub mod handlers;
pub mod routes;

pub use config::{Direction, Document, DocumentLoader, Row};
pub use error::{AppError, ConfigError, FieldError};
pub use resource::{Resource, ResourceKind};
pub use response::{success, success_created, success_paginated, Envelope};
pub use settings::{PageLimits, Settings};
pub use state::AppState;
pub use store::{Executor, MemoryStore, PgStore, Store, Transaction};
pub use routes::{common_routes, resource_routes};
pub use service::{CrudService, Listing, WriteMode};

use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Full application router: resource routes under `/api/v1`, common routes at the root.
pub fn app(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .nest("/api/v1", resource_routes(state))
        .merge(common_routes())
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(body_limit_bytes)))
}
