//! In-process backend: evaluates the same [`Select`] trees as the SQL renderer over plain maps.
//!
//! Transactions work on a snapshot of every table and swap it in on commit. Writers take turns:
//! a transaction holds the write gate from `begin` until commit, rollback or drop, and autocommit
//! writes wait for it. Reads see committed rows only.
//! Tables spring into existence on first insert; reading a missing table yields no rows.

use crate::config::Row;
use crate::error::AppError;
use crate::sql::{as_number, key_eq, value_text, CmpOp, ColumnRef, JoinKind, Predicate, Projection, Select, SortOrder};
use crate::store::{Executor, Store, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as Gate, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, i64>,
}

/// Unique columns, as `(table, column)`.
type Constraints = Arc<Vec<(String, String)>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    writer: Arc<Gate<()>>,
    unique: Constraints,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts and updates that would repeat a non-null value of `table.column`.
    pub fn with_unique(mut self, table: &str, column: &str) -> Self {
        Arc::make_mut(&mut self.unique).push((table.to_string(), column.to_string()));
        self
    }

    /// Snapshot of a table's committed rows, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .map(|t| t.rows.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Fatal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn acquire(&self) -> Result<Box<dyn Executor>, AppError> {
        Ok(Box::new(MemConn { store: self.clone() }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let turn = self.writer.clone().lock_owned().await;
        let snapshot = self.lock()?.clone();
        Ok(Box::new(MemTx {
            store: self.clone(),
            snapshot,
            _turn: turn,
        }))
    }
}

/// Autocommit handle: every call works on the shared tables directly.
struct MemConn {
    store: MemoryStore,
}

struct MemTx {
    store: MemoryStore,
    snapshot: Tables,
    _turn: OwnedMutexGuard<()>,
}

#[async_trait]
impl Executor for MemConn {
    async fn fetch_all(&mut self, select: &Select) -> Result<Vec<Row>, AppError> {
        Ok(self.store.lock()?.select(select))
    }

    async fn count(&mut self, select: &Select) -> Result<u64, AppError> {
        Ok(self.store.lock()?.count(select))
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, AppError> {
        let _turn = self.store.writer.lock().await;
        let unique = self.store.unique.clone();
        self.store.lock()?.insert(&unique, table, row)
    }

    async fn update(&mut self, table: &str, filter: &Predicate, row: &Row) -> Result<u64, AppError> {
        let _turn = self.store.writer.lock().await;
        let unique = self.store.unique.clone();
        self.store.lock()?.update(&unique, table, filter, row)
    }

    async fn delete(&mut self, table: &str, filter: &Predicate) -> Result<u64, AppError> {
        let _turn = self.store.writer.lock().await;
        Ok(self.store.lock()?.delete(table, filter))
    }
}

#[async_trait]
impl Executor for MemTx {
    async fn fetch_all(&mut self, select: &Select) -> Result<Vec<Row>, AppError> {
        Ok(self.snapshot.select(select))
    }

    async fn count(&mut self, select: &Select) -> Result<u64, AppError> {
        Ok(self.snapshot.count(select))
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, AppError> {
        self.snapshot.insert(&self.store.unique, table, row)
    }

    async fn update(&mut self, table: &str, filter: &Predicate, row: &Row) -> Result<u64, AppError> {
        self.snapshot.update(&self.store.unique, table, filter, row)
    }

    async fn delete(&mut self, table: &str, filter: &Predicate) -> Result<u64, AppError> {
        Ok(self.snapshot.delete(table, filter))
    }
}

#[async_trait]
impl Transaction for MemTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemTx { store, snapshot, _turn } = *self;
        *store.lock()? = snapshot;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

/// Rows visible to one result line: table name or join alias -> row (None for an unmatched LEFT JOIN).
type Scope<'a> = HashMap<&'a str, Option<&'a Row>>;

impl Tables {
    fn table(&self, name: &str) -> &[Row] {
        self.rows.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn scopes<'a>(&'a self, select: &'a Select) -> Vec<Scope<'a>> {
        let mut scopes: Vec<Scope<'a>> = self
            .table(&select.table)
            .iter()
            .map(|r| HashMap::from([(select.table.as_str(), Some(r))]))
            .collect();
        for join in &select.joins {
            let candidates = self.table(&join.table);
            let mut next = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let key = lookup(&scope, &join.to);
                let matches: Vec<&Row> = candidates
                    .iter()
                    .filter(|r| key_eq(r.get(&join.on_column).unwrap_or(&Value::Null), &key))
                    .collect();
                if matches.is_empty() {
                    if join.kind == JoinKind::Left {
                        let mut s = scope.clone();
                        s.insert(join.alias.as_str(), None);
                        next.push(s);
                    }
                    continue;
                }
                for m in matches {
                    let mut s = scope.clone();
                    s.insert(join.alias.as_str(), Some(m));
                    next.push(s);
                }
            }
            scopes = next;
        }
        match &select.filter {
            Some(p) => scopes.into_iter().filter(|s| eval(p, s)).collect(),
            None => scopes,
        }
    }

    fn select(&self, select: &Select) -> Vec<Row> {
        let mut scopes = self.scopes(select);
        if !select.order_by.is_empty() {
            scopes.sort_by(|a, b| {
                for o in &select.order_by {
                    let ord = cmp_sort(&lookup(a, &o.column), &lookup(b, &o.column));
                    let ord = match o.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let offset = select.offset.unwrap_or(0) as usize;
        let limit = select.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        scopes
            .iter()
            .skip(offset)
            .take(limit)
            .map(|s| project(&select.projection, s))
            .collect()
    }

    fn count(&self, select: &Select) -> u64 {
        self.scopes(select).len() as u64
    }

    fn check_unique(&self, unique: &[(String, String)], table: &str, row: &Row, skip: Option<usize>) -> Result<(), AppError> {
        for (t, col) in unique.iter().filter(|(t, _)| t == table) {
            let Some(v) = row.get(col).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = self
                .table(t)
                .iter()
                .enumerate()
                .any(|(i, r)| Some(i) != skip && r.get(col).map(|e| key_eq(e, v)).unwrap_or(false));
            if clash {
                return Err(AppError::Constraint(format!("duplicate value for {}.{}", table, col)));
            }
        }
        Ok(())
    }

    fn insert(&mut self, unique: &[(String, String)], table: &str, row: &Row) -> Result<Row, AppError> {
        self.check_unique(unique, table, row, None)?;
        let next = self.next_id.get(table).copied().unwrap_or(1);
        let id = match row.get("id").and_then(Value::as_i64) {
            Some(id) => {
                if self.table(table).iter().any(|r| r.get("id").and_then(Value::as_i64) == Some(id)) {
                    return Err(AppError::Constraint(format!("duplicate value for {}.id", table)));
                }
                id
            }
            None => next,
        };
        self.next_id.insert(table.to_string(), next.max(id + 1));

        let mut stored = Row::new();
        stored.insert("id".into(), Value::from(id));
        for (k, v) in row {
            if k != "id" {
                stored.insert(k.clone(), v.clone());
            }
        }
        self.rows.entry(table.to_string()).or_default().push(stored.clone());
        Ok(stored)
    }

    fn update(&mut self, unique: &[(String, String)], table: &str, filter: &Predicate, row: &Row) -> Result<u64, AppError> {
        let matched: Vec<usize> = self
            .table(table)
            .iter()
            .enumerate()
            .filter(|(_, r)| eval(filter, &HashMap::from([(table, Some(*r))])))
            .map(|(i, _)| i)
            .collect();
        for &i in &matched {
            self.check_unique(unique, table, row, Some(i))?;
        }
        if let Some(rows) = self.rows.get_mut(table) {
            for &i in &matched {
                for (k, v) in row {
                    rows[i].insert(k.clone(), v.clone());
                }
            }
        }
        Ok(matched.len() as u64)
    }

    fn delete(&mut self, table: &str, filter: &Predicate) -> u64 {
        let Some(rows) = self.rows.get_mut(table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|r| !eval(filter, &HashMap::from([(table, Some(r))])));
        (before - rows.len()) as u64
    }
}

fn lookup(scope: &Scope<'_>, c: &ColumnRef) -> Value {
    scope
        .get(c.table.as_str())
        .copied()
        .flatten()
        .and_then(|r| r.get(&c.column))
        .cloned()
        .unwrap_or(Value::Null)
}

fn project(projection: &[Projection], scope: &Scope<'_>) -> Row {
    let mut out = Row::new();
    for p in projection {
        match p {
            Projection::All(t) => {
                if let Some(Some(r)) = scope.get(t.as_str()) {
                    for (k, v) in r.iter() {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            Projection::Column { column, alias } => {
                out.insert(alias.clone(), lookup(scope, column));
            }
        }
    }
    out
}

/// Ordering for a comparison predicate; None when the values are incomparable.
fn cmp_values(column: &Value, value: &Value) -> Option<Ordering> {
    match value {
        Value::String(s) => value_text(column).map(|c| c.as_str().cmp(s.as_str())),
        Value::Number(_) => as_number(column)?.partial_cmp(&as_number(value)?),
        Value::Bool(b) => column.as_bool().map(|c| c.cmp(b)),
        other => value_text(column).zip(value_text(other)).map(|(c, v)| c.cmp(&v)),
    }
}

/// Sort order with nulls last, as PostgreSQL does for ascending order.
fn cmp_sort(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => match (a, b) {
            (Value::Number(_), Value::Number(_)) => as_number(a)
                .partial_cmp(&as_number(b))
                .unwrap_or(Ordering::Equal),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => value_text(a).cmp(&value_text(b)),
        },
    }
}

fn eval(p: &Predicate, scope: &Scope<'_>) -> bool {
    match p {
        Predicate::Compare { column, op, value } => {
            let lhs = lookup(scope, column);
            if value.is_null() {
                return match op {
                    CmpOp::Eq => lhs.is_null(),
                    CmpOp::Ne => !lhs.is_null(),
                    _ => false,
                };
            }
            if lhs.is_null() {
                return false;
            }
            let Some(ord) = cmp_values(&lhs, value) else {
                return false;
            };
            match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::Ne => ord != Ordering::Equal,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Gte => ord != Ordering::Less,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Lte => ord != Ordering::Greater,
            }
        }
        Predicate::Contains { column, needle } => value_text(&lookup(scope, column))
            .map(|t| t.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
        Predicate::In { column, values } => {
            let lhs = lookup(scope, column);
            values.iter().any(|v| key_eq(&lhs, v))
        }
        Predicate::And(parts) => parts.iter().all(|q| eval(q, scope)),
        Predicate::Or(parts) => parts.iter().any(|q| eval(q, scope)),
    }
}
