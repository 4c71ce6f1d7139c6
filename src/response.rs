//! Standard response envelope helpers.

use crate::service::query::{Pagination, QuerySummary};
use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: Status,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Envelope {
            status: Status::Success,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope {
            status: Status::Error,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Validation failures carry the full list of field errors as data.
    pub fn failed(message: impl Into<String>, data: Value) -> Self {
        Envelope {
            status: Status::Failed,
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedEnvelope {
    pub status: Status,
    pub message: String,
    pub data: Vec<Value>,
    pub pagination: Pagination,
    pub filter: serde_json::Map<String, Value>,
    pub search: Option<String>,
    pub summary: Value,
}

pub fn success(message: impl Into<String>, data: Value) -> (StatusCode, Json<Envelope>) {
    (StatusCode::OK, Json(Envelope::success(message, data)))
}

pub fn success_created(message: impl Into<String>, data: Value) -> (StatusCode, Json<Envelope>) {
    (StatusCode::CREATED, Json(Envelope::success(message, data)))
}

pub fn success_paginated(
    message: impl Into<String>,
    data: Vec<Value>,
    query: QuerySummary,
    summary: Value,
) -> (StatusCode, Json<PaginatedEnvelope>) {
    (
        StatusCode::OK,
        Json(PaginatedEnvelope {
            status: Status::Success,
            message: message.into(),
            data,
            pagination: query.pagination,
            filter: query.filter,
            search: query.search,
            summary,
        }),
    )
}
