//! Document-driven operations on one resource table.

use crate::config::{Direction, Document, DocumentLoader, Row};
use crate::error::AppError;
use crate::resource::Resource;
use crate::service::query::{QueryBuilder, QuerySummary};
use crate::service::relations::{apply_belongs_to, resolve};
use crate::service::write::{write, WriteMode};
use crate::settings::PageLimits;
use crate::sql::{as_number, Predicate, Select};
use crate::store::Store;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One page of shaped rows with what was applied to produce it.
#[derive(Debug)]
pub struct Listing {
    pub rows: Vec<Row>,
    pub query: QuerySummary,
    /// Row count of the page plus per-field sums of the document's `summary` fields.
    pub summary: Value,
}

#[derive(Clone)]
pub struct CrudService {
    store: Arc<dyn Store>,
    loader: DocumentLoader,
    limits: PageLimits,
}

impl CrudService {
    pub fn new(store: Arc<dyn Store>, loader: DocumentLoader, limits: PageLimits) -> Self {
        CrudService { store, loader, limits }
    }

    pub fn loader(&self) -> &DocumentLoader {
        &self.loader
    }

    async fn document(&self, resource: &Resource, direction: Direction, operation: &str) -> Result<Document, AppError> {
        Ok(self.loader.load(resource, direction, operation).await?)
    }

    /// One row by id, shaped by `response/{table}/find.json` with every relation attached.
    pub async fn find(&self, resource: &Resource, id: &str) -> Result<Row, AppError> {
        self.find_one(resource, "id", path_id(id)).await
    }

    pub async fn find_by_slug(&self, resource: &Resource, slug: &str) -> Result<Row, AppError> {
        self.find_one(resource, "slug", Value::String(slug.to_string())).await
    }

    async fn find_one(&self, resource: &Resource, column: &str, key: Value) -> Result<Row, AppError> {
        let doc = self.document(resource, Direction::Response, "find").await?;
        let mut s = Select::from(&resource.table);
        apply_belongs_to(&mut s, &doc);
        let by_key = Predicate::eq(s.col(column), key);
        s.and_where(by_key);

        let mut conn = self.store.acquire().await?;
        let raw = conn
            .fetch_optional(&s)
            .await?
            .ok_or_else(|| not_found(resource))?;
        let mut rows = resolve(&mut *conn, &doc, &resource.table, &[raw], doc.tree.is_some()).await?;
        rows.pop().ok_or_else(|| not_found(resource))
    }

    /// Filtered, searched, ordered page. The total is counted before paging.
    pub async fn find_all(&self, resource: &Resource, params: &HashMap<String, String>) -> Result<Listing, AppError> {
        let doc = self.document(resource, Direction::Response, "find").await?;
        let mut s = Select::from(&resource.table);
        apply_belongs_to(&mut s, &doc);
        let query = QueryBuilder::new(&doc, &resource.table).build(params, self.limits, &mut s);

        let mut conn = self.store.acquire().await?;
        let total = conn.count(&s).await?;
        let query = QuerySummary {
            pagination: query.pagination.with_total(total),
            ..query
        };
        s.page(query.pagination.size, query.pagination.offset());
        let raws = conn.fetch_all(&s).await?;

        let threaded = doc.tree.is_some()
            && params
                .get("include_childs")
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
        let rows = resolve(&mut *conn, &doc, &resource.table, &raws, threaded).await?;
        let summary = summarize(&doc, &rows);
        Ok(Listing { rows, query, summary })
    }

    /// Validate and write a new row with its groups, shaped by `request/{table}/create.json`.
    pub async fn create(&self, resource: &Resource, input: &Row) -> Result<Row, AppError> {
        let doc = self.document(resource, Direction::Request, "create").await?;
        write(self.store.as_ref(), &doc, resource, input, WriteMode::Create).await
    }

    /// Update the fields given in `input`; groups present in `input` are replaced.
    pub async fn update(&self, resource: &Resource, id: &str, input: &Row) -> Result<Row, AppError> {
        let doc = self.document(resource, Direction::Request, "update").await?;
        write(self.store.as_ref(), &doc, resource, input, WriteMode::Update(path_id(id))).await
    }

    pub async fn delete(&self, resource: &Resource, id: &str) -> Result<(), AppError> {
        let mut conn = self.store.acquire().await?;
        let by_id = Predicate::eq(Select::from(&resource.table).col("id"), path_id(id));
        let n = conn.delete(&resource.table, &by_id).await?;
        if n == 0 {
            return Err(not_found(resource));
        }
        tracing::info!(table = %resource.table, id, "row deleted");
        Ok(())
    }

    /// Delete every row matching the `filterable` parameters of `request/{table}/delete.json`.
    /// Refuses to run without at least one predicate. Returns the count and the applied filters.
    pub async fn delete_by_query(&self, resource: &Resource, params: &HashMap<String, String>) -> Result<(u64, Row), AppError> {
        let doc = self.document(resource, Direction::Request, "delete").await?;
        let mut applied = Row::new();
        let preds: Vec<Predicate> = QueryBuilder::new(&doc, &resource.table)
            .filter(params, &mut applied)
            .into_iter()
            .filter(|p| on_table(p, &resource.table))
            .collect();
        let Some(filter) = Predicate::all(preds) else {
            return Err(AppError::BadRequest(format!(
                "delete {} requires at least one filter",
                resource.plural_label
            )));
        };
        let mut conn = self.store.acquire().await?;
        let n = conn.delete(&resource.table, &filter).await?;
        tracing::info!(table = %resource.table, rows = n, "rows deleted by query");
        Ok((n, applied))
    }
}

fn not_found(resource: &Resource) -> AppError {
    AppError::NotFound(format!("{} not found", resource.singular_label))
}

/// Path ids are integers when they look like one, else kept as text (uuid keys).
fn path_id(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// A DELETE has no joins; predicates on belongs-to columns cannot apply.
fn on_table(p: &Predicate, table: &str) -> bool {
    match p {
        Predicate::Compare { column, .. } | Predicate::Contains { column, .. } | Predicate::In { column, .. } => {
            column.table == table
        }
        Predicate::And(ps) | Predicate::Or(ps) => ps.iter().all(|p| on_table(p, table)),
    }
}

fn summarize(doc: &Document, rows: &[Row]) -> Value {
    let mut out = Row::new();
    out.insert("count".into(), Value::from(rows.len()));
    for field in &doc.summary {
        let sum: f64 = rows.iter().filter_map(|r| r.get(field)).filter_map(as_number).sum();
        let total = if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
            Value::from(sum as i64)
        } else {
            serde_json::Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
        };
        out.insert(field.clone(), total);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use serde_json::json;

    #[test]
    fn path_ids_prefer_integers() {
        assert_eq!(path_id("42"), json!(42));
        assert_eq!(path_id("5f0c-uuid"), json!("5f0c-uuid"));
    }

    #[test]
    fn summary_counts_and_sums() {
        let doc = parse_document("t", json!({"price": 0, "summary": ["price", "weight"]})).unwrap();
        let rows: Vec<Row> = [json!({"price": 10, "weight": 1.5}), json!({"price": "5", "weight": null})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        assert_eq!(summarize(&doc, &rows), json!({"count": 2, "price": 15, "weight": 1.5}));
    }
}
