//! Create / update orchestration.
//!
//! [`plan`] turns a request body into column rows without touching storage: validation, shifting,
//! slug derivation, duplicate expansion and partitioning. [`write`] then stores the parent row,
//! its has-many groups (parents before children) and its many-to-many pairings on one
//! transaction, rolling everything back on the first error.

use crate::config::{Document, DuplicateConfig, DuplicateRule, HasMany, Row};
use crate::error::{AppError, FieldError};
use crate::inflect::slugify;
use crate::resource::Resource;
use crate::service::relations::row_id;
use crate::service::shift::{shift, strip_nulls};
use crate::service::validation::RequestValidator;
use crate::sql::{ColumnRef, Predicate, Projection, Select};
use crate::store::{Executor, Store};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, PartialEq)]
pub enum WriteMode {
    Create,
    /// Update the row with this id.
    Update(Value),
}

impl WriteMode {
    fn is_update(&self) -> bool {
        matches!(self, WriteMode::Update(_))
    }
}

/// Storage-ready form of one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WritePlan {
    /// Parent row keyed by column.
    pub row: Row,
    /// Parent row keyed by document field, echoed back to the client.
    pub fields: Row,
    /// Root has-many groups to write, in document order. Nested groups stay inside their entries.
    pub groups: Vec<(String, Vec<Row>)>,
    /// Many-to-many pairings per group, without the owning key.
    pub links: Vec<(String, Vec<Row>)>,
}

/// Validate and shape a request body.
pub fn plan(doc: &Document, input: &Row, mode: &WriteMode) -> Result<WritePlan, AppError> {
    RequestValidator::validate(input, &doc.rules)?;

    let mut row = doc.template.clone();
    shift(&mut row, input, None);
    if mode.is_update() {
        // Defaults only fill in on create.
        row.retain(|field, _| input.contains_key(field));
    }
    derive_slug(doc, input, mode, &mut row);
    strip_nulls(&mut row);

    let mut errors = Vec::new();
    let mut groups = Vec::new();
    let rules = duplicate_rules(doc, input).unwrap_or_default();
    for g in doc.children_of(None) {
        if let Some(v) = row.remove(&g.name) {
            let mut entries = entries_of(doc, g, v, &mut errors);
            if let Some(rule) = rules.get(&g.name) {
                expand(&g.name, rule, &mut entries, input, &mut errors);
            }
            groups.push((g.name.clone(), entries));
        }
    }

    let mut links = Vec::new();
    for g in &doc.many_to_many {
        if let Some(v) = row.remove(&g.name) {
            let pairs = match v {
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, item)| pairing(&g.config.fk_2, item, &format!("{}[{}]", g.name, i), &mut errors))
                    .collect(),
                _ => {
                    errors.push(FieldError::new(&g.name, format!("{} must be an array", g.name)));
                    Vec::new()
                }
            };
            links.push((g.name.clone(), pairs));
        }
    }

    for b in &doc.belongs_to {
        row.remove(&b.field);
    }
    if let Some(tree) = &doc.tree {
        row.remove(&tree.field);
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    let columns = row
        .iter()
        .map(|(field, v)| (doc.column_for(field).to_string(), v.clone()))
        .collect();
    Ok(WritePlan {
        row: columns,
        fields: row,
        groups,
        links,
    })
}

/// On create a declared `slug` missing from the input comes from `name`, else a random UUID.
/// On update it is re-derived from a new `name` only when the document's slug default is empty.
fn derive_slug(doc: &Document, input: &Row, mode: &WriteMode, row: &mut Row) {
    let Some(default) = doc.template.get("slug") else {
        return;
    };
    let given = input.get("slug").and_then(Value::as_str).map(|s| !s.is_empty()).unwrap_or(false);
    if given {
        return;
    }
    let from_name = input
        .get("name")
        .and_then(Value::as_str)
        .map(slugify)
        .filter(|s| !s.is_empty());
    match mode {
        WriteMode::Create => {
            let slug = from_name.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            row.insert("slug".into(), Value::String(slug));
        }
        WriteMode::Update(_) => {
            if let (Some(slug), Some("")) = (from_name, default.as_str()) {
                row.insert("slug".into(), Value::String(slug));
            }
        }
    }
}

/// Entries of a root group slot, with every nested slot shape-checked.
fn entries_of(doc: &Document, group: &HasMany, v: Value, errors: &mut Vec<FieldError>) -> Vec<Row> {
    let name = &group.name;
    match v {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::Object(entry) => {
                    check_nested(doc, group, &entry, &format!("{}[{}]", name, i), errors);
                    Some(entry)
                }
                _ => {
                    errors.push(FieldError::new(format!("{}[{}]", name, i), "must be an object"));
                    None
                }
            })
            .collect(),
        _ => {
            errors.push(FieldError::new(name, format!("{} must be an array", name)));
            Vec::new()
        }
    }
}

/// Nested group payloads must be arrays of objects all the way down.
fn check_nested(doc: &Document, group: &HasMany, entry: &Row, path: &str, errors: &mut Vec<FieldError>) {
    for c in doc.children_of(Some(group.name.as_str())) {
        match entry.get(&c.name) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}.{}[{}]", path, c.name, i);
                    match item {
                        Value::Object(child) => check_nested(doc, c, child, &item_path, errors),
                        _ => errors.push(FieldError::new(item_path, "must be an object")),
                    }
                }
            }
            Some(_) => errors.push(FieldError::new(format!("{}.{}", path, c.name), "must be an array")),
        }
    }
}

/// A many-to-many item: a bare secondary key, or an object carrying it under `fk_2`.
fn pairing(fk_2: &str, item: Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Row> {
    match item {
        Value::Object(obj) => {
            if obj.get(fk_2).map(|v| !v.is_null()).unwrap_or(false) {
                Some(obj)
            } else {
                errors.push(FieldError::new(path, format!("must carry `{}`", fk_2)));
                None
            }
        }
        Value::Null | Value::Array(_) => {
            errors.push(FieldError::new(path, "must be an id or an object"));
            None
        }
        key => {
            let mut obj = Row::new();
            obj.insert(fk_2.to_string(), key);
            Some(obj)
        }
    }
}

/// Effective duplicate rules per root group. An explicit `"duplicate": false` in the input wins;
/// `true` seeds every root group when the document has no rules of its own.
fn duplicate_rules(doc: &Document, input: &Row) -> Option<BTreeMap<String, DuplicateRule>> {
    let seed_all = || {
        doc.children_of(None)
            .map(|g| (g.name.clone(), DuplicateRule::default()))
            .collect()
    };
    match (input.get("duplicate"), &doc.duplicate) {
        (Some(Value::Bool(false)), _) => None,
        (_, Some(DuplicateConfig::Groups(rules))) => Some(rules.clone()),
        (_, Some(DuplicateConfig::Enabled(true))) | (Some(Value::Bool(true)), _) => Some(seed_all()),
        _ => None,
    }
}

/// Expand one group from its template entry: the one flagged `default: true`, else the first.
pub fn expand(name: &str, rule: &DuplicateRule, entries: &mut Vec<Row>, input: &Row, errors: &mut Vec<FieldError>) {
    if entries.is_empty() {
        return;
    }
    let t = entries
        .iter()
        .position(|e| e.get("default") == Some(&Value::Bool(true)))
        .unwrap_or(0);
    let template = entries[t].clone();

    let values: Vec<Option<Value>> = if let Some(values) = &rule.values {
        values.iter().cloned().map(Some).collect()
    } else if let Some(from) = &rule.from {
        match input.get(from) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values.iter().cloned().map(Some).collect(),
            Some(_) => {
                errors.push(FieldError::new(from, format!("{} must be an array", from)));
                return;
            }
        }
    } else {
        vec![None; rule.count.unwrap_or(0)]
    };

    if values.is_empty() {
        // Seed: complete every entry from the template.
        for (i, entry) in entries.iter_mut().enumerate() {
            if i == t {
                continue;
            }
            for (k, v) in &template {
                if k != "default" && entry.get(k).map(Value::is_null).unwrap_or(true) {
                    entry.insert(k.clone(), v.clone());
                }
            }
        }
        return;
    }

    let flagged = template.get("default") == Some(&Value::Bool(true));
    *entries = values
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let mut entry = template.clone();
            if let (Some(key), Some(value)) = (&rule.key, value) {
                entry.insert(key.clone(), value);
            }
            if flagged {
                entry.insert("default".into(), Value::Bool(i == 0));
            }
            entry
        })
        .collect();
    tracing::debug!(group = name, rows = entries.len(), "duplicate expanded");
}

/// Plan and store one write on a fresh transaction. Nothing persists unless every step succeeds.
pub async fn write(store: &dyn Store, doc: &Document, resource: &Resource, input: &Row, mode: WriteMode) -> Result<Row, AppError> {
    let plan = plan(doc, input, &mode)?;
    let mut tx = store.begin().await?;
    match execute(&mut *tx, doc, resource, plan, &mode).await {
        Ok(out) => {
            tx.commit().await?;
            tracing::info!(table = %resource.table, id = %row_id(&out), update = mode.is_update(), "write committed");
            Ok(out)
        }
        Err(e) => {
            match tx.rollback().await {
                Ok(()) => tracing::warn!(table = %resource.table, error = %e, "write rolled back"),
                Err(rb) => tracing::warn!(table = %resource.table, error = %e, rollback = %rb, "rollback failed"),
            }
            Err(e)
        }
    }
}

/// One has-many entry on its way into storage.
struct Node {
    group: String,
    owner: Value,
    entry: Row,
    parent: Option<usize>,
    stored: Row,
}

/// Store a planned write on `exec`. Returns the parent fields with the id and every written group.
pub async fn execute<E>(exec: &mut E, doc: &Document, resource: &Resource, plan: WritePlan, mode: &WriteMode) -> Result<Row, AppError>
where
    E: Executor + ?Sized,
{
    let table = resource.table.as_str();
    let id = match mode {
        WriteMode::Create => {
            let stored = exec.insert(table, &plan.row).await?;
            match row_id(&stored) {
                Value::Null => refetch_id(exec, resource, &plan.row).await?,
                id => id,
            }
        }
        WriteMode::Update(id) => {
            let filter = Predicate::eq(ColumnRef::new(table, "id"), id.clone());
            if exec.update(table, &filter, &plan.row).await? == 0 {
                return Err(AppError::NotFound(format!("{} not found", resource.singular_label)));
            }
            id.clone()
        }
    };

    let mut out = Row::new();
    out.insert("id".into(), id.clone());
    out.extend(plan.fields);

    let roots: Vec<String> = plan.groups.iter().map(|(name, _)| name.clone()).collect();
    if mode.is_update() {
        delete_groups(exec, doc, &roots, &id).await?;
    }
    let mut nodes: Vec<Node> = plan
        .groups
        .into_iter()
        .flat_map(|(group, entries)| {
            let id = id.clone();
            entries.into_iter().map(move |entry| Node {
                group: group.clone(),
                owner: id.clone(),
                entry,
                parent: None,
                stored: Row::new(),
            })
        })
        .collect();
    for g in &doc.has_many {
        let pending: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].group == g.name).collect();
        for i in pending {
            let mut entry = std::mem::take(&mut nodes[i].entry);
            let mut nested = Vec::new();
            for c in doc.children_of(Some(g.name.as_str())) {
                if let Some(Value::Array(items)) = entry.remove(&c.name) {
                    nested.push((c.name.clone(), items));
                }
            }
            entry.insert(g.fk.clone(), nodes[i].owner.clone());
            let stored = exec.insert(&g.table, &entry).await?;
            let child_id = row_id(&stored);
            if child_id.is_null() && nested.iter().any(|(_, items)| !items.is_empty()) {
                return Err(AppError::Fatal(format!("{} row has no id for its nested groups", g.table)));
            }
            nodes[i].stored = stored;
            for (group, items) in nested {
                for item in items {
                    if let Value::Object(entry) = item {
                        nodes.push(Node {
                            group: group.clone(),
                            owner: child_id.clone(),
                            entry,
                            parent: Some(i),
                            stored: Row::new(),
                        });
                    }
                }
            }
        }
    }
    for name in roots {
        let written = nest_written(doc, &nodes, None, &name);
        out.insert(name, Value::Array(written));
    }

    for (name, pairs) in plan.links {
        let Some(g) = doc.many_to_many.iter().find(|g| g.name == name) else {
            return Err(AppError::Fatal(format!("unknown many_to_many group {}", name)));
        };
        let c = &g.config;
        if mode.is_update() {
            exec.delete(&c.table, &Predicate::eq(ColumnRef::new(&c.table, &c.fk_1), id.clone()))
                .await?;
        }
        let mut written = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let mut link = Row::new();
            link.insert(c.fk_1.clone(), id.clone());
            link.extend(pair);
            written.push(Value::Object(exec.insert(&c.table, &link).await?));
        }
        out.insert(name, Value::Array(written));
    }
    Ok(out)
}

/// Rows written for `group` under `parent`, with their own nested groups inside.
fn nest_written(doc: &Document, nodes: &[Node], parent: Option<usize>, group: &str) -> Vec<Value> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.parent == parent && n.group == group)
        .map(|(i, n)| {
            let mut row = n.stored.clone();
            for c in doc.children_of(Some(group)) {
                let children = nest_written(doc, nodes, Some(i), &c.name);
                if !children.is_empty() {
                    row.insert(c.name.clone(), Value::Array(children));
                }
            }
            Value::Object(row)
        })
        .collect()
}

/// Backends that do not return the inserted row: look the row up again by its natural key.
async fn refetch_id<E>(exec: &mut E, resource: &Resource, row: &Row) -> Result<Value, AppError>
where
    E: Executor + ?Sized,
{
    let Some(slug) = row.get("slug") else {
        return Err(AppError::Fatal(format!("created {} has no id", resource.singular_label)));
    };
    let mut s = Select::from(&resource.table);
    let by_slug = Predicate::eq(s.col("slug"), slug.clone());
    s.and_where(by_slug);
    let found = exec.fetch_optional(&s).await?;
    match found.as_ref().map(row_id) {
        Some(id) if !id.is_null() => Ok(id),
        _ => Err(AppError::Fatal(format!("created {} not found by slug", resource.singular_label))),
    }
}

/// Remove the stored rows of the named root groups and of every group nested under them,
/// deepest first.
async fn delete_groups<E>(exec: &mut E, doc: &Document, roots: &[String], id: &Value) -> Result<(), AppError>
where
    E: Executor + ?Sized,
{
    let mut replaced: Vec<&HasMany> = Vec::new();
    for g in &doc.has_many {
        let take = match &g.parent {
            None => roots.contains(&g.name),
            Some(p) => replaced.iter().any(|r| &r.name == p),
        };
        if take {
            replaced.push(g);
        }
    }

    // owners[g]: ids the rows of `g` point at. stored[g]: ids of the rows of `g` themselves.
    let mut owners: HashMap<&str, Vec<Value>> = HashMap::new();
    let mut stored: HashMap<&str, Vec<Value>> = HashMap::new();
    for g in &replaced {
        let of_group = match &g.parent {
            None => vec![id.clone()],
            Some(p) => stored.get(p.as_str()).cloned().unwrap_or_default(),
        };
        let has_children = doc.children_of(Some(g.name.as_str())).next().is_some();
        if has_children && !of_group.is_empty() {
            let mut s = Select::from(&g.table);
            let fk = s.col(&g.fk);
            s.projection = vec![Projection::Column {
                column: s.col("id"),
                alias: "id".into(),
            }];
            s.and_where(Predicate::In {
                column: fk,
                values: of_group.clone(),
            });
            let ids = exec.fetch_all(&s).await?.iter().map(row_id).filter(|v| !v.is_null()).collect();
            stored.insert(g.name.as_str(), ids);
        }
        owners.insert(g.name.as_str(), of_group);
    }

    for g in replaced.iter().rev() {
        let of_group = owners.remove(g.name.as_str()).unwrap_or_default();
        if of_group.is_empty() {
            continue;
        }
        let n = exec
            .delete(&g.table, &Predicate::In {
                column: ColumnRef::new(&g.table, &g.fk),
                values: of_group,
            })
            .await?;
        tracing::debug!(group = %g.name, rows = n, "has_many cleared");
    }
    Ok(())
}
