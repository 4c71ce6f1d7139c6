//! Relation attachment for shaped rows: belongs-to joins, batched has-many levels,
//! many-to-many through a join table, and threaded children of the same table.

use crate::config::{Document, Row, TreeConfig};
use crate::error::AppError;
use crate::service::shift::shift;
use crate::sql::{key_eq, ColumnRef, Join, JoinKind, Predicate, Projection, Select, SortOrder};
use crate::store::Executor;
use serde_json::Value;
use std::collections::HashMap;

/// Join alias of a many-to-many secondary table.
const TARGET: &str = "__target";
/// Column alias carrying the owning row's id in many-to-many reads.
const OWNER: &str = "__owner";

/// Generated id of a stored row (null when the table has none).
pub fn row_id(row: &Row) -> Value {
    row.get("id").cloned().unwrap_or(Value::Null)
}

fn present(ids: &[Value]) -> Vec<Value> {
    ids.iter().filter(|v| !v.is_null()).cloned().collect()
}

/// LEFT JOIN every belongs-to relation and select its columns as `relation.column`.
pub fn apply_belongs_to(select: &mut Select, doc: &Document) {
    for b in &doc.belongs_to {
        let to = select.col(&b.fk);
        select.joins.push(Join {
            kind: JoinKind::Left,
            table: b.table.clone(),
            alias: b.field.clone(),
            on_column: b.key.clone(),
            to,
        });
        for column in b.fields.keys() {
            select.projection.push(Projection::Column {
                column: ColumnRef::new(&b.field, column),
                alias: format!("{}.{}", b.field, column),
            });
        }
    }
}

/// Shift a stored row into the document template and nest its belongs-to columns.
/// A relation whose foreign key is null is attached as null.
pub fn shape_row(doc: &Document, raw: &Row) -> Row {
    let mut shaped = doc.template.clone();
    shift(&mut shaped, raw, Some(doc));
    for b in &doc.belongs_to {
        let linked = raw.get(&b.fk).map(|v| !v.is_null()).unwrap_or(false);
        let slot = if linked {
            let mut nested = b.fields.clone();
            for (column, v) in nested.iter_mut() {
                if let Some(found) = raw.get(&format!("{}.{}", b.field, column)) {
                    *v = found.clone();
                }
            }
            Value::Object(nested)
        } else {
            Value::Null
        };
        shaped.insert(b.field.clone(), slot);
    }
    shaped
}

/// Child rows of every has-many group, one query per group for all owners at once.
/// Groups are fetched in dependency order so nested groups key on their parent group's rows.
pub async fn attach_has_many<E>(exec: &mut E, doc: &Document, rows: &mut [Row], ids: &[Value]) -> Result<(), AppError>
where
    E: Executor + ?Sized,
{
    if doc.has_many.is_empty() {
        return Ok(());
    }
    let mut fetched: HashMap<&str, Vec<Row>> = HashMap::new();
    for g in &doc.has_many {
        let owners = match &g.parent {
            None => present(ids),
            Some(parent) => fetched
                .get(parent.as_str())
                .map(|rows| present(&rows.iter().map(row_id).collect::<Vec<_>>()))
                .unwrap_or_default(),
        };
        let children = if owners.is_empty() {
            Vec::new()
        } else {
            let mut s = Select::from(&g.table);
            let fk = s.col(&g.fk);
            let id = s.col("id");
            s.and_where(Predicate::In { column: fk, values: owners });
            s.order(id, SortOrder::Asc);
            exec.fetch_all(&s).await?
        };
        tracing::debug!(group = %g.name, rows = children.len(), "has_many fetched");
        fetched.insert(g.name.as_str(), children);
    }
    for (row, id) in rows.iter_mut().zip(ids) {
        nest_children(doc, &fetched, None, id, row);
    }
    Ok(())
}

fn nest_children(doc: &Document, fetched: &HashMap<&str, Vec<Row>>, group: Option<&str>, owner: &Value, target: &mut Row) {
    for g in doc.children_of(group) {
        let rows = fetched.get(g.name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let children: Vec<Value> = rows
            .iter()
            .filter(|r| key_eq(r.get(&g.fk).unwrap_or(&Value::Null), owner))
            .map(|raw| {
                let mut child = match &g.template {
                    Some(t) => {
                        let mut t = t.clone();
                        shift(&mut t, raw, None);
                        t
                    }
                    None => raw.clone(),
                };
                nest_children(doc, fetched, Some(g.name.as_str()), &row_id(raw), &mut child);
                Value::Object(child)
            })
            .collect();
        target.insert(g.name.clone(), Value::Array(children));
    }
}

/// Linked rows of every many-to-many group. With a `target` table the secondary rows are attached,
/// otherwise the join rows themselves.
pub async fn attach_many_to_many<E>(exec: &mut E, doc: &Document, rows: &mut [Row], ids: &[Value]) -> Result<(), AppError>
where
    E: Executor + ?Sized,
{
    for g in &doc.many_to_many {
        let c = &g.config;
        let owners = present(ids);
        let linked = if owners.is_empty() {
            Vec::new()
        } else {
            let mut s = Select::from(&c.table);
            let fk_1 = s.col(&c.fk_1);
            let fk_2 = s.col(&c.fk_2);
            s.and_where(Predicate::In {
                column: fk_1.clone(),
                values: owners,
            });
            if let Some(target) = &c.target {
                s.joins.push(Join {
                    kind: JoinKind::Inner,
                    table: target.clone(),
                    alias: TARGET.into(),
                    on_column: c.target_key.clone(),
                    to: fk_2,
                });
                s.projection = vec![
                    Projection::All(TARGET.into()),
                    Projection::Column {
                        column: fk_1,
                        alias: OWNER.into(),
                    },
                ];
            }
            exec.fetch_all(&s).await?
        };
        let owner_key = if c.target.is_some() { OWNER } else { c.fk_1.as_str() };
        for (row, id) in rows.iter_mut().zip(ids) {
            let items: Vec<Value> = linked
                .iter()
                .filter(|r| key_eq(r.get(owner_key).unwrap_or(&Value::Null), id))
                .map(|r| {
                    let mut r = r.clone();
                    r.remove(OWNER);
                    match &g.template {
                        Some(t) => {
                            let mut t = t.clone();
                            shift(&mut t, &r, None);
                            Value::Object(t)
                        }
                        None => Value::Object(r),
                    }
                })
                .collect();
            row.insert(g.name.clone(), Value::Array(items));
        }
    }
    Ok(())
}

/// Rows of `table` whose `parent_key` points at each row, nested recursively up to `max_depth` levels.
/// One query per level.
pub async fn attach_tree<E>(exec: &mut E, doc: &Document, table: &str, rows: &mut [Row], ids: &[Value]) -> Result<(), AppError>
where
    E: Executor + ?Sized,
{
    let Some(tree) = &doc.tree else {
        return Ok(());
    };
    let mut all: Vec<Row> = Vec::new();
    let mut frontier = present(ids);
    for _ in 0..tree.max_depth {
        if frontier.is_empty() {
            break;
        }
        let mut s = Select::from(table);
        apply_belongs_to(&mut s, doc);
        let parent = s.col(&tree.parent_key);
        let id = s.col("id");
        s.and_where(Predicate::In {
            column: parent,
            values: std::mem::take(&mut frontier),
        });
        s.order(id, SortOrder::Asc);
        let level = exec.fetch_all(&s).await?;
        frontier = present(&level.iter().map(row_id).collect::<Vec<_>>());
        all.extend(level);
    }
    for (row, id) in rows.iter_mut().zip(ids) {
        row.insert(tree.field.clone(), Value::Array(thread(doc, tree, &all, id, 1)));
    }
    Ok(())
}

fn thread(doc: &Document, tree: &TreeConfig, all: &[Row], parent: &Value, depth: usize) -> Vec<Value> {
    all.iter()
        .filter(|r| key_eq(r.get(&tree.parent_key).unwrap_or(&Value::Null), parent))
        .map(|raw| {
            let mut node = shape_row(doc, raw);
            let children = if depth < tree.max_depth {
                thread(doc, tree, all, &row_id(raw), depth + 1)
            } else {
                Vec::new()
            };
            node.insert(tree.field.clone(), Value::Array(children));
            Value::Object(node)
        })
        .collect()
}

/// Shape stored rows (selected with [`apply_belongs_to`]) and attach every relation.
pub async fn resolve<E>(exec: &mut E, doc: &Document, table: &str, raws: &[Row], threaded: bool) -> Result<Vec<Row>, AppError>
where
    E: Executor + ?Sized,
{
    let ids: Vec<Value> = raws.iter().map(row_id).collect();
    let mut rows: Vec<Row> = raws.iter().map(|r| shape_row(doc, r)).collect();
    attach_has_many(exec, doc, &mut rows, &ids).await?;
    attach_many_to_many(exec, doc, &mut rows, &ids).await?;
    if threaded {
        attach_tree(exec, doc, table, &mut rows, &ids).await?;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::store::{MemoryStore, Store};
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn belongs_to_nests_aliased_columns() {
        let doc = parse_document(
            "t",
            json!({"name": "", "category": {"belongs_to": {"table": "categories", "fk": "category_id", "fields": {"name": ""}}}}),
        )
        .unwrap();
        let mut s = Select::from("products");
        apply_belongs_to(&mut s, &doc);
        assert_eq!(s.joins[0].alias, "category");
        assert_eq!(s.joins[0].to, ColumnRef::new("products", "category_id"));

        let shaped = shape_row(&doc, &row(json!({"id": 1, "name": "Shirt", "category_id": 4, "category.name": "Tops"})));
        assert_eq!(shaped, row(json!({"name": "Shirt", "category": {"name": "Tops"}})));
        let orphan = shape_row(&doc, &row(json!({"id": 2, "name": "Hat", "category_id": null, "category.name": null})));
        assert_eq!(orphan["category"], Value::Null);
    }

    #[tokio::test]
    async fn nested_has_many_is_batched_and_distributed() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        for v in [
            json!({"product_id": 1, "size": "S"}),
            json!({"product_id": 2, "size": "M"}),
            json!({"product_id": 1, "size": "L"}),
        ] {
            conn.insert("variants", &row(v)).await.unwrap();
        }
        conn.insert("variant_prices", &row(json!({"variant_id": 3, "amount": 9}))).await.unwrap();

        let doc = parse_document(
            "t",
            json!({
                "name": "",
                "variants": [{"size": "", "prices": [{"amount": 0}]}],
                "has_many": {
                    "variants": {"table": "variants", "fk": "product_id"},
                    "prices": {"table": "variant_prices", "fk": "variant_id", "parent": "variants"}
                }
            }),
        )
        .unwrap();
        let raws = vec![row(json!({"id": 1, "name": "Shirt"})), row(json!({"id": 2, "name": "Hat"}))];
        let rows = resolve(&mut *conn, &doc, "products", &raws, false).await.unwrap();
        assert_eq!(
            rows[0]["variants"],
            json!([{"size": "S", "prices": []}, {"size": "L", "prices": [{"amount": 9}]}])
        );
        assert_eq!(rows[1]["variants"], json!([{"size": "M", "prices": []}]));

        // Resolving again overwrites the slots.
        let mut again = rows.clone();
        attach_has_many(&mut *conn, &doc, &mut again, &[json!(1), json!(2)]).await.unwrap();
        assert_eq!(again, rows);
    }

    #[tokio::test]
    async fn many_to_many_through_target() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        conn.insert("tags", &row(json!({"name": "sale"}))).await.unwrap();
        conn.insert("tags", &row(json!({"name": "new"}))).await.unwrap();
        conn.insert("product_tags", &row(json!({"product_id": 1, "tag_id": 2}))).await.unwrap();

        let doc = parse_document(
            "t",
            json!({
                "tags": [{"id": 0, "name": ""}],
                "many_to_many": {"tags": {"table": "product_tags", "fk_1": "product_id", "fk_2": "tag_id", "target": "tags"}}
            }),
        )
        .unwrap();
        let mut rows = vec![doc.template.clone()];
        attach_many_to_many(&mut *conn, &doc, &mut rows, &[json!(1)]).await.unwrap();
        assert_eq!(rows[0]["tags"], json!([{"id": 2, "name": "new"}]));
    }

    #[tokio::test]
    async fn threads_children_to_max_depth() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        conn.insert("product_comments", &row(json!({"body": "root", "parent_id": null}))).await.unwrap();
        conn.insert("product_comments", &row(json!({"body": "reply", "parent_id": 1}))).await.unwrap();
        conn.insert("product_comments", &row(json!({"body": "deep", "parent_id": 2}))).await.unwrap();

        let doc = parse_document("t", json!({"body": "", "tree": {"max_depth": 1}})).unwrap();
        let raws = vec![row(json!({"id": 1, "body": "root"}))];
        let rows = resolve(&mut *conn, &doc, "product_comments", &raws, true).await.unwrap();
        assert_eq!(rows[0]["childs"], json!([{"body": "reply", "childs": []}]));
    }
}
