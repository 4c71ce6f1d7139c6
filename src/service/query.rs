//! List query parameters → predicate tree, ordering and paging, plus the summary echoed to clients.

use crate::config::{Document, Row};
use crate::settings::PageLimits;
use crate::sql::{CmpOp, ColumnRef, Predicate, Select, SortOrder};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub size: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    /// Rows skipped before this page. Saturates at the largest offset PostgreSQL accepts.
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.size)
            .min(i64::MAX as u64)
    }

    /// Record the matching row count.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self.total_pages = total.div_ceil(self.size);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuerySummary {
    /// Applied filter parameters, as received.
    pub filter: Row,
    pub search: Option<String>,
    pub pagination: Pagination,
}

pub struct QueryBuilder<'a> {
    doc: &'a Document,
    table: &'a str,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(doc: &'a Document, table: &'a str) -> Self {
        QueryBuilder { doc, table }
    }

    /// Column a filterable or searchable name refers to: `field` on the base table,
    /// or `relation.column` on a belongs-to join.
    fn column(&self, name: &str) -> ColumnRef {
        match name.split_once('.') {
            Some((alias, column)) => ColumnRef::new(alias, column),
            None => ColumnRef::new(self.table, self.doc.column_for(name)),
        }
    }

    /// Filters from `filterable` fields. Unknown parameters and empty values are ignored.
    pub fn filter(&self, params: &HashMap<String, String>, applied: &mut Row) -> Vec<Predicate> {
        let mut preds = Vec::new();
        for field in &self.doc.filterable {
            for (suffix, op) in [
                ("", CmpOp::Eq),
                ("_ne", CmpOp::Ne),
                ("_gt", CmpOp::Gt),
                ("_gte", CmpOp::Gte),
                ("_lt", CmpOp::Lt),
                ("_lte", CmpOp::Lte),
            ] {
                let key = format!("{}{}", field, suffix);
                let Some(raw) = params.get(&key).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
                    continue;
                };
                debug_assert!(suffix.is_empty() || CmpOp::from_suffix(&suffix[1..]) == Some(op));
                preds.push(Predicate::Compare {
                    column: self.column(field),
                    op,
                    value: param_value(op, raw),
                });
                applied.insert(key, Value::String(raw.to_string()));
            }
        }
        preds
    }

    /// Case-insensitive substring match over every searchable field.
    pub fn search(&self, params: &HashMap<String, String>) -> Option<(String, Predicate)> {
        let term = params.get("search").map(|s| s.trim()).filter(|s| !s.is_empty())?;
        if self.doc.searchable.is_empty() {
            return None;
        }
        let any = self
            .doc
            .searchable
            .iter()
            .map(|f| Predicate::Contains {
                column: self.column(f),
                needle: term.to_string(),
            })
            .collect();
        Some((term.to_string(), Predicate::Or(any)))
    }

    /// `order_by` must name a plain document field; anything else sorts by `id DESC`.
    pub fn order(&self, params: &HashMap<String, String>, select: &mut Select) {
        let field = params
            .get("order_by")
            .map(|s| s.trim())
            .filter(|f| self.doc.scalar_fields().any(|known| known == *f));
        match field {
            Some(f) => {
                let order = params
                    .get("order")
                    .and_then(|o| SortOrder::parse(o.trim()))
                    .unwrap_or(SortOrder::Desc);
                select.order(self.column(f), order);
            }
            None => {
                select.order(ColumnRef::new(self.table, "id"), SortOrder::Desc);
            }
        }
    }

    /// Apply filters, search and ordering to `select`. Paging is left to the caller so it can count first.
    pub fn build(&self, params: &HashMap<String, String>, limits: PageLimits, select: &mut Select) -> QuerySummary {
        let mut summary = QuerySummary {
            pagination: pagination(params, limits),
            ..Default::default()
        };
        for p in self.filter(params, &mut summary.filter) {
            select.and_where(p);
        }
        if let Some((term, p)) = self.search(params) {
            select.and_where(p);
            summary.search = Some(term);
        }
        self.order(params, select);
        summary
    }
}

/// `page` from 1, `size` defaulted and clamped to the configured maximum.
pub fn pagination(params: &HashMap<String, String>, limits: PageLimits) -> Pagination {
    let page = params
        .get("page")
        .and_then(|p| p.trim().parse::<u64>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let size = params
        .get("size")
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|s| *s >= 1)
        .unwrap_or(limits.default_size)
        .min(limits.max_size);
    Pagination {
        page,
        size,
        total: 0,
        total_pages: 0,
    }
}

/// Equality compares text forms so it works on any column; ranges compare numbers when the value is one.
fn param_value(op: CmpOp, raw: &str) -> Value {
    if matches!(op, CmpOp::Eq | CmpOp::Ne) {
        return Value::String(raw.to_string());
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    match raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn doc() -> Document {
        parse_document(
            "t",
            json!({
                "name": "",
                "title": {"column": "label"},
                "price": 0,
                "category": {"belongs_to": {"table": "categories", "fk": "category_id", "fields": {"name": ""}}},
                "filterable": ["name", "price", "category.name"],
                "searchable": ["name", "title"]
            }),
        )
        .unwrap()
    }

    #[test]
    fn filters_with_suffixes_and_ignores_unknown() {
        let doc = doc();
        let mut s = Select::from("products");
        let summary = QueryBuilder::new(&doc, "products").build(
            &params(&[("name", "Shirt"), ("price_gte", "10"), ("price_lt", ""), ("color", "red"), ("category.name", "Tops")]),
            PageLimits::default(),
            &mut s,
        );
        assert_eq!(
            s.filter,
            Some(Predicate::And(vec![
                Predicate::eq(ColumnRef::new("products", "name"), json!("Shirt")),
                Predicate::Compare {
                    column: ColumnRef::new("products", "price"),
                    op: CmpOp::Gte,
                    value: json!(10)
                },
                Predicate::eq(ColumnRef::new("category", "name"), json!("Tops")),
            ]))
        );
        assert_eq!(summary.filter, json!({"name": "Shirt", "price_gte": "10", "category.name": "Tops"}).as_object().cloned().unwrap());
    }

    #[test]
    fn search_ors_over_mapped_columns() {
        let doc = doc();
        let mut s = Select::from("products");
        let summary = QueryBuilder::new(&doc, "products").build(&params(&[("search", " shi ")]), PageLimits::default(), &mut s);
        assert_eq!(summary.search.as_deref(), Some("shi"));
        assert_eq!(
            s.filter,
            Some(Predicate::Or(vec![
                Predicate::Contains { column: ColumnRef::new("products", "name"), needle: "shi".into() },
                Predicate::Contains { column: ColumnRef::new("products", "label"), needle: "shi".into() },
            ]))
        );
    }

    #[test]
    fn order_uses_allow_list() {
        let doc = doc();
        let b = QueryBuilder::new(&doc, "products");
        let mut s = Select::from("products");
        b.order(&params(&[("order_by", "price"), ("order", "asc")]), &mut s);
        assert_eq!(s.order_by[0].column, ColumnRef::new("products", "price"));
        assert_eq!(s.order_by[0].order, SortOrder::Asc);

        let mut s = Select::from("products");
        b.order(&params(&[("order_by", "price; DROP TABLE products")]), &mut s);
        assert_eq!(s.order_by[0].column, ColumnRef::new("products", "id"));
        assert_eq!(s.order_by[0].order, SortOrder::Desc);

        let mut s = Select::from("products");
        b.order(&params(&[("order_by", "category")]), &mut s);
        assert_eq!(s.order_by[0].column.column, "id");
    }

    #[test]
    fn pagination_defaults_and_clamps() {
        let limits = PageLimits::default();
        let p = pagination(&params(&[]), limits);
        assert_eq!((p.page, p.size), (1, 10));
        let p = pagination(&params(&[("page", "0"), ("size", "1000")]), limits);
        assert_eq!((p.page, p.size), (1, 100));
        let p = pagination(&params(&[("page", "2"), ("size", "10")]), limits).with_total(25);
        assert_eq!((p.offset(), p.total, p.total_pages), (10, 25, 3));
    }

    #[test]
    fn huge_pages_clamp_the_offset() {
        let p = pagination(&params(&[("page", "18446744073709551615"), ("size", "100")]), PageLimits::default());
        assert_eq!(p.page, u64::MAX);
        assert_eq!(p.offset(), i64::MAX as u64);
    }
}
