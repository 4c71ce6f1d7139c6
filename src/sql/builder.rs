//! Renders [`Select`] and row writes into parameterized PostgreSQL.
//!
//! Row payloads are bound as one JSONB parameter and expanded with `jsonb_populate_record`,
//! so JSON values coerce to each column's declared type on the server.

use crate::config::Row;
use crate::sql::params::PgBindValue;
use crate::sql::select::{CmpOp, ColumnRef, JoinKind, Predicate, Projection, Select, SortOrder};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from validated documents).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn column(c: &ColumnRef) -> String {
    format!("{}.{}", quoted(&c.table), quoted(&c.column))
}

/// Escape LIKE wildcards so a search term matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    fn predicate(&mut self, p: &Predicate) -> String {
        match p {
            Predicate::Compare { column: c, op, value } => self.compare(c, *op, value),
            Predicate::Contains { column: c, needle } => {
                let n = self.push_param(PgBindValue::Text(like_pattern(needle)));
                format!("{}::text ILIKE ${}", column(c), n)
            }
            Predicate::In { column: c, values } => {
                if values.is_empty() {
                    return "FALSE".into();
                }
                let bind = PgBindValue::array_from_json(values);
                let lhs = match bind {
                    PgBindValue::I64Array(_) => column(c),
                    _ => format!("{}::text", column(c)),
                };
                let n = self.push_param(bind);
                format!("{} = ANY(${})", lhs, n)
            }
            Predicate::And(parts) => self.group(parts, " AND ", "TRUE"),
            Predicate::Or(parts) => self.group(parts, " OR ", "FALSE"),
        }
    }

    fn group(&mut self, parts: &[Predicate], sep: &str, empty: &str) -> String {
        if parts.is_empty() {
            return empty.into();
        }
        let rendered: Vec<String> = parts.iter().map(|p| self.predicate(p)).collect();
        format!("({})", rendered.join(sep))
    }

    /// Strings compare against the column's text form; numbers and booleans compare natively.
    fn compare(&mut self, c: &ColumnRef, op: CmpOp, value: &Value) -> String {
        match value {
            Value::Null => match op {
                CmpOp::Eq => format!("{} IS NULL", column(c)),
                CmpOp::Ne => format!("{} IS NOT NULL", column(c)),
                _ => "FALSE".into(),
            },
            Value::Number(_) | Value::Bool(_) => {
                let n = self.push_param(PgBindValue::from_json(value));
                format!("{} {} ${}", column(c), op.sql(), n)
            }
            Value::String(s) => {
                let n = self.push_param(PgBindValue::Text(s.clone()));
                format!("{}::text {} ${}", column(c), op.sql(), n)
            }
            other => {
                let n = self.push_param(PgBindValue::Text(other.to_string()));
                format!("{}::text {} ${}", column(c), op.sql(), n)
            }
        }
    }

    fn where_clause(&mut self, filter: Option<&Predicate>) -> String {
        filter.map(|p| format!(" WHERE {}", self.predicate(p))).unwrap_or_default()
    }
}

fn from_clause(schema: &str, select: &Select) -> String {
    let mut out = qualified_table(schema, &select.table);
    for j in &select.joins {
        let kind = match j.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        out.push_str(&format!(
            " {} {} AS {} ON {}.{} = {}",
            kind,
            qualified_table(schema, &j.table),
            quoted(&j.alias),
            quoted(&j.alias),
            quoted(&j.on_column),
            column(&j.to)
        ));
    }
    out
}

pub fn select(schema: &str, select: &Select) -> QueryBuf {
    let mut q = QueryBuf::default();
    let cols: Vec<String> = select
        .projection
        .iter()
        .map(|p| match p {
            Projection::All(t) => format!("{}.*", quoted(t)),
            Projection::Column { column: c, alias } => format!("{} AS {}", column(c), quoted(alias)),
        })
        .collect();
    let from = from_clause(schema, select);
    let where_clause = q.where_clause(select.filter.as_ref());
    let order_clause = if select.order_by.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = select
            .order_by
            .iter()
            .map(|o| {
                let dir = match o.order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                format!("{} {}", column(&o.column), dir)
            })
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_clause = select.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = select.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        cols.join(", "),
        from,
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

/// COUNT(*) over the same FROM/WHERE, ignoring order and paging.
pub fn count(schema: &str, select: &Select) -> QueryBuf {
    let mut q = QueryBuf::default();
    let from = from_clause(schema, select);
    let where_clause = q.where_clause(select.filter.as_ref());
    q.sql = format!("SELECT COUNT(*) FROM {}{}", from, where_clause);
    q
}

/// INSERT one row; returns every column of the stored row.
pub fn insert(schema: &str, table: &str, row: &Row) -> QueryBuf {
    let mut q = QueryBuf::default();
    let target = qualified_table(schema, table);
    if row.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", target);
        return q;
    }
    let cols: Vec<String> = row.keys().map(|k| quoted(k)).collect();
    let n = q.push_param(PgBindValue::Json(Value::Object(row.clone())));
    q.sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM jsonb_populate_record(NULL::{}, ${}) RETURNING *",
        target,
        cols.join(", "),
        cols.join(", "),
        target,
        n
    );
    q
}

/// UPDATE rows matching `filter`, setting only the columns present in `row`. Caller guarantees `row` is non-empty.
pub fn update(schema: &str, table: &str, filter: &Predicate, row: &Row) -> QueryBuf {
    const SRC: &str = "__src";
    let mut q = QueryBuf::default();
    let target = qualified_table(schema, table);
    let sets: Vec<String> = row
        .keys()
        .map(|k| format!("{} = {}.{}", quoted(k), quoted(SRC), quoted(k)))
        .collect();
    let n = q.push_param(PgBindValue::Json(Value::Object(row.clone())));
    let where_clause = q.where_clause(Some(filter));
    q.sql = format!(
        "UPDATE {} SET {} FROM jsonb_populate_record(NULL::{}, ${}) AS {}{}",
        target,
        sets.join(", "),
        target,
        n,
        quoted(SRC),
        where_clause
    );
    q
}

pub fn delete(schema: &str, table: &str, filter: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::default();
    let where_clause = q.where_clause(Some(filter));
    q.sql = format!("DELETE FROM {}{}", qualified_table(schema, table), where_clause);
    q
}
