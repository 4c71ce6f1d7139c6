//! Resource handlers: find, find all, create, update, delete, delete by query.
//! Every route is parameterized by `{kind}/{table}`; the documents decide the rest.

use crate::config::Row;
use crate::error::AppError;
use crate::resource::{Resource, ResourceKind};
use crate::response::{success, success_created, success_paginated};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;

fn resource(kind: &str, table: &str) -> Result<Resource, AppError> {
    Resource::new(kind.parse::<ResourceKind>()?, table)
}

fn body_to_row(body: Result<Json<Value>, JsonRejection>) -> Result<Row, AppError> {
    match body {
        Ok(Json(Value::Object(m))) => Ok(m),
        Ok(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
        Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
}

pub async fn find_all(
    State(state): State<AppState>,
    Path((kind, table)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    let listing = state.crud.find_all(&resource, &params).await?;
    let rows = listing.rows.into_iter().map(Value::Object).collect();
    Ok(success_paginated(
        format!("find {} success", resource.plural_label),
        rows,
        listing.query,
        listing.summary,
    ))
}

pub async fn find(
    State(state): State<AppState>,
    Path((kind, table, id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    let row = state.crud.find(&resource, &id).await?;
    Ok(success(format!("find {} success", resource.singular_label), Value::Object(row)))
}

pub async fn find_by_slug(
    State(state): State<AppState>,
    Path((kind, table, slug)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    let row = state.crud.find_by_slug(&resource, &slug).await?;
    Ok(success(format!("find {} success", resource.singular_label), Value::Object(row)))
}

pub async fn create(
    State(state): State<AppState>,
    Path((kind, table)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    let input = body_to_row(body)?;
    let row = state.crud.create(&resource, &input).await?;
    Ok(success_created(format!("create {} success", resource.singular_label), Value::Object(row)))
}

pub async fn update(
    State(state): State<AppState>,
    Path((kind, table, id)): Path<(String, String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    let input = body_to_row(body)?;
    let row = state.crud.update(&resource, &id, &input).await?;
    Ok(success(format!("update {} success", resource.singular_label), Value::Object(row)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((kind, table, id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    state.crud.delete(&resource, &id).await?;
    Ok(success(format!("delete {} success", resource.singular_label), Value::Null))
}

pub async fn delete_by_query(
    State(state): State<AppState>,
    Path((kind, table)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let resource = resource(&kind, &table)?;
    let (deleted, filter) = state.crud.delete_by_query(&resource, &params).await?;
    Ok(success(
        format!("delete {} success", resource.plural_label),
        json!({"deleted": deleted, "filter": filter}),
    ))
}
