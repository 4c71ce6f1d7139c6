//! PostgreSQL backend over a sqlx pool.

use crate::config::Row;
use crate::error::AppError;
use crate::sql::{builder, Predicate, QueryBuf, Select};
use crate::store::{Executor, Store, Transaction};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn acquire(&self) -> Result<Box<dyn Executor>, AppError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgConn {
            conn,
            schema: self.schema.clone(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            schema: self.schema.clone(),
        }))
    }
}

struct PgConn {
    conn: PoolConnection<Postgres>,
    schema: String,
}

struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
    schema: String,
}

#[async_trait]
impl Executor for PgConn {
    async fn fetch_all(&mut self, select: &Select) -> Result<Vec<Row>, AppError> {
        fetch_rows(&mut self.conn, &builder::select(&self.schema, select)).await
    }

    async fn count(&mut self, select: &Select) -> Result<u64, AppError> {
        count_rows(&mut self.conn, &builder::count(&self.schema, select)).await
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, AppError> {
        insert_row(&mut self.conn, &self.schema, table, row).await
    }

    async fn update(&mut self, table: &str, filter: &Predicate, row: &Row) -> Result<u64, AppError> {
        update_rows(&mut self.conn, &self.schema, table, filter, row).await
    }

    async fn delete(&mut self, table: &str, filter: &Predicate) -> Result<u64, AppError> {
        execute(&mut self.conn, &builder::delete(&self.schema, table, filter)).await
    }
}

#[async_trait]
impl Executor for PgTx {
    async fn fetch_all(&mut self, select: &Select) -> Result<Vec<Row>, AppError> {
        fetch_rows(&mut self.tx, &builder::select(&self.schema, select)).await
    }

    async fn count(&mut self, select: &Select) -> Result<u64, AppError> {
        count_rows(&mut self.tx, &builder::count(&self.schema, select)).await
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, AppError> {
        insert_row(&mut self.tx, &self.schema, table, row).await
    }

    async fn update(&mut self, table: &str, filter: &Predicate, row: &Row) -> Result<u64, AppError> {
        update_rows(&mut self.tx, &self.schema, table, filter, row).await
    }

    async fn delete(&mut self, table: &str, filter: &Predicate) -> Result<u64, AppError> {
        execute(&mut self.tx, &builder::delete(&self.schema, table, filter)).await
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn bind_all<'q>(
    q: &'q QueryBuf,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

async fn fetch_rows(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<Row>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bind_all(q).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(row_to_map).collect())
}

async fn count_rows(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    let n = query.fetch_one(&mut *conn).await?;
    Ok(n.max(0) as u64)
}

async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let done = bind_all(q).execute(&mut *conn).await?;
    Ok(done.rows_affected())
}

async fn insert_row(conn: &mut PgConnection, schema: &str, table: &str, row: &Row) -> Result<Row, AppError> {
    let q = builder::insert(schema, table, row);
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let stored = bind_all(&q).fetch_optional(&mut *conn).await?;
    Ok(stored.map(|r| row_to_map(&r)).unwrap_or_default())
}

async fn update_rows(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
    filter: &Predicate,
    row: &Row,
) -> Result<u64, AppError> {
    if row.is_empty() {
        let mut s = Select::from(table);
        s.and_where(filter.clone());
        return count_rows(conn, &builder::count(schema, &s)).await;
    }
    execute(conn, &builder::update(schema, table, filter, row)).await
}

/// Decode a result row by column type.
pub fn row_to_map(row: &PgRow) -> Row {
    let mut map = Row::new();
    for col in row.columns() {
        let v = cell_to_value(row, col.ordinal(), CellKind::of(col.type_info().name()));
        map.insert(col.name().to_string(), v);
    }
    map
}

/// How a column is read back into JSON, by PostgreSQL type name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CellKind {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Bool,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Interval,
    Json,
    IntArray,
    BigIntArray,
    TextArray,
    /// Text, enums and anything else whose wire form is its label.
    Text,
}

impl CellKind {
    fn of(type_name: &str) -> Self {
        match type_name {
            "INT2" => CellKind::Int2,
            "INT4" | "OID" => CellKind::Int4,
            "INT8" => CellKind::Int8,
            "FLOAT4" => CellKind::Float4,
            "FLOAT8" => CellKind::Float8,
            "NUMERIC" => CellKind::Numeric,
            "BOOL" => CellKind::Bool,
            "UUID" => CellKind::Uuid,
            "TIMESTAMPTZ" => CellKind::TimestampTz,
            "TIMESTAMP" => CellKind::Timestamp,
            "DATE" => CellKind::Date,
            "TIME" => CellKind::Time,
            "INTERVAL" => CellKind::Interval,
            "JSON" | "JSONB" => CellKind::Json,
            "INT2[]" | "INT4[]" => CellKind::IntArray,
            "INT8[]" => CellKind::BigIntArray,
            "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => CellKind::TextArray,
            _ => CellKind::Text,
        }
    }
}

fn cell<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn array<T>(row: &PgRow, idx: usize) -> Option<Value>
where
    T: for<'a> sqlx::Decode<'a, Postgres> + sqlx::Type<Postgres> + sqlx::postgres::PgHasArrayType + Into<Value>,
{
    cell::<Vec<Option<T>>>(row, idx).map(|items| {
        Value::Array(items.into_iter().map(|i| i.map(Into::into).unwrap_or(Value::Null)).collect())
    })
}

fn cell_to_value(row: &PgRow, idx: usize, kind: CellKind) -> Value {
    let v = match kind {
        CellKind::Int2 => cell::<i16>(row, idx).map(Value::from),
        CellKind::Int4 => cell::<i32>(row, idx).map(Value::from),
        CellKind::Int8 => cell::<i64>(row, idx).map(Value::from),
        CellKind::Float4 => cell::<f32>(row, idx).and_then(|n| serde_json::Number::from_f64(n as f64)).map(Value::Number),
        CellKind::Float8 => cell::<f64>(row, idx).and_then(serde_json::Number::from_f64).map(Value::Number),
        CellKind::Numeric => cell::<Decimal>(row, idx).map(decimal_value),
        CellKind::Bool => cell::<bool>(row, idx).map(Value::Bool),
        CellKind::Uuid => cell::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        CellKind::TimestampTz => cell::<chrono::DateTime<chrono::Utc>>(row, idx).map(|d| Value::String(d.to_rfc3339())),
        CellKind::Timestamp => cell::<chrono::NaiveDateTime>(row, idx)
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        CellKind::Date => cell::<chrono::NaiveDate>(row, idx).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        CellKind::Time => cell::<chrono::NaiveTime>(row, idx).map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        CellKind::Interval => cell::<PgInterval>(row, idx).map(|i| Value::String(interval_text(&i))),
        CellKind::Json => cell::<Value>(row, idx),
        CellKind::IntArray => array::<i32>(row, idx),
        CellKind::BigIntArray => array::<i64>(row, idx),
        CellKind::TextArray => array::<String>(row, idx),
        // Enum and domain labels travel as text but carry their own type oid.
        CellKind::Text => row.try_get_unchecked::<Option<String>, _>(idx).ok().flatten().map(Value::String),
    };
    v.unwrap_or(Value::Null)
}

/// NUMERIC as a JSON number when one represents it exactly, else its decimal text.
fn decimal_value(d: Decimal) -> Value {
    let text = d.normalize().to_string();
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    match text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) if n.to_string() == text => Value::Number(n),
        _ => Value::String(text),
    }
}

/// ISO 8601 duration, e.g. `P1M2DT3.5S`.
fn interval_text(i: &PgInterval) -> String {
    let mut out = String::from("P");
    if i.months != 0 {
        out.push_str(&format!("{}M", i.months));
    }
    if i.days != 0 {
        out.push_str(&format!("{}D", i.days));
    }
    if i.microseconds != 0 {
        let secs = i.microseconds / 1_000_000;
        let micros = (i.microseconds % 1_000_000).abs();
        let sign = if i.microseconds < 0 && secs == 0 { "-" } else { "" };
        if micros == 0 {
            out.push_str(&format!("T{}{}S", sign, secs));
        } else {
            let frac = format!("{:06}", micros);
            out.push_str(&format!("T{}{}.{}S", sign, secs, frac.trim_end_matches('0')));
        }
    }
    if out.len() == 1 {
        out.push_str("T0S");
    }
    out
}
