//! Load transformation and filter documents from the settings directory.
//!
//! Layout: `{root}/transformers/{request|response}/{table}/{operation}.json` and
//! `{root}/filters/{table}/{operation}.json`. Documents are read fresh on every call.

use crate::config::resolved::{BelongsTo, Document, HasMany, ManyToMany, Row, RESERVED_KEYS};
use crate::config::types::*;
use crate::config::{sort_groups, validate};
use crate::error::ConfigError;
use crate::resource::Resource;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Relation kinds this engine does not implement; declaring one is a config error, not a literal.
const UNSUPPORTED_RELATIONS: &[&str] = &["has_one", "morph_to", "belongs_to_many", "has_many", "many_to_many"];

const FIELD_CONFIG_KEYS: &[&str] = &["column", "default", "rules"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Input shape for create / update / delete-by-query.
    Request,
    /// Output shape for find.
    Response,
}

impl Direction {
    fn dir_name(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DocumentLoader {
    root: PathBuf,
}

impl DocumentLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DocumentLoader { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transformer_path(&self, resource: &Resource, direction: Direction, operation: &str) -> PathBuf {
        self.root
            .join("transformers")
            .join(direction.dir_name())
            .join(&resource.table)
            .join(format!("{}.json", operation))
    }

    pub fn filter_path(&self, resource: &Resource, operation: &str) -> PathBuf {
        self.root
            .join("filters")
            .join(&resource.table)
            .join(format!("{}.json", operation))
    }

    /// Load the transformation document for an operation, merged with its filter document when one exists.
    pub async fn load(&self, resource: &Resource, direction: Direction, operation: &str) -> Result<Document, ConfigError> {
        let path = self.transformer_path(resource, direction, operation);
        let raw = read_json(&path)
            .await?
            .ok_or_else(|| ConfigError::NotFound(path.display().to_string()))?;
        let mut doc = parse_document(&path.display().to_string(), raw)?;

        let filter_path = self.filter_path(resource, operation);
        if let Some(raw_filter) = read_json(&filter_path).await? {
            let filter: FilterDocumentConfig = from_value(&filter_path.display().to_string(), raw_filter)?;
            merge_filter_document(&mut doc, filter);
        }
        validate(&path.display().to_string(), &doc)?;
        tracing::debug!(path = %path.display(), "loaded document");
        Ok(doc)
    }
}

/// Read and parse a JSON file. Ok(None) when the file does not exist.
async fn read_json(path: &Path) -> Result<Option<Value>, ConfigError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Load(format!("{}: {}", path.display(), e))),
    };
    serde_json::from_str(&text).map(Some).map_err(|e| ConfigError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn from_value<T: DeserializeOwned>(path: &str, v: Value) -> Result<T, ConfigError> {
    serde_json::from_value(v).map_err(|e| malformed(path, e.to_string()))
}

fn malformed(path: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Malformed {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// First element of a one-element array of objects: the per-child shape of a group slot.
fn group_template(v: Option<&Value>) -> Option<Row> {
    match v {
        Some(Value::Array(items)) => match items.first() {
            Some(Value::Object(o)) => Some(o.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn take_section(path: &str, obj: &mut Map<String, Value>, key: &str) -> Result<Option<Map<String, Value>>, ConfigError> {
    match obj.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(m)) => Ok(Some(m)),
        Some(_) => Err(malformed(path, format!("`{}` must be an object", key))),
    }
}

/// Turn a raw transformation document into a typed [`Document`]. Structural checks happen in `validate`.
pub fn parse_document(path: &str, raw: Value) -> Result<Document, ConfigError> {
    let Value::Object(mut obj) = raw else {
        return Err(malformed(path, "document must be a JSON object"));
    };
    let mut doc = Document::default();

    if let Some(v) = obj.remove("filterable") {
        doc.filterable = from_value(path, v)?;
    }
    if let Some(v) = obj.remove("searchable") {
        doc.searchable = from_value(path, v)?;
    }
    if let Some(v) = obj.remove("summary") {
        doc.summary = from_value(path, v)?;
    }
    if let Some(v) = obj.remove("duplicate") {
        doc.duplicate = Some(from_value(path, v)?);
    }
    if let Some(v) = obj.remove("tree") {
        doc.tree = Some(from_value(path, v)?);
    }
    let has_many = take_section(path, &mut obj, "has_many")?.unwrap_or_default();
    let many_to_many = take_section(path, &mut obj, "many_to_many")?.unwrap_or_default();
    debug_assert!(RESERVED_KEYS.iter().all(|k| !obj.contains_key(*k)));

    for (field, value) in obj {
        match value {
            Value::Object(mut entry) if entry.contains_key("belongs_to") => {
                if entry.len() != 1 {
                    return Err(malformed(path, format!("field `{}`: belongs_to must be the only key", field)));
                }
                let cfg: BelongsToConfig = from_value(path, entry.remove("belongs_to").unwrap_or_default())?;
                doc.template.insert(field.clone(), Value::Object(cfg.fields.clone()));
                doc.belongs_to.push(BelongsTo {
                    field,
                    table: cfg.table,
                    fk: cfg.fk,
                    key: cfg.key,
                    fields: cfg.fields,
                });
            }
            Value::Object(entry) if entry.len() == 1 && UNSUPPORTED_RELATIONS.iter().any(|k| entry.contains_key(*k)) => {
                let kind = entry.keys().next().cloned().unwrap_or_default();
                return Err(malformed(path, format!("field `{}`: unsupported relation kind `{}`", field, kind)));
            }
            Value::Object(entry) if !entry.is_empty() && entry.keys().all(|k| FIELD_CONFIG_KEYS.contains(&k.as_str())) => {
                let cfg: FieldConfig = from_value(path, Value::Object(entry))?;
                if let Some(col) = cfg.column {
                    if col != field {
                        doc.columns.insert(field.clone(), col);
                    }
                }
                if let Some(rule) = cfg.rules {
                    doc.rules.insert(field.clone(), rule);
                }
                doc.template.insert(field, cfg.default);
            }
            other => {
                doc.template.insert(field, other);
            }
        }
    }

    for (name, v) in has_many {
        let cfg: HasManyConfig = from_value(path, v)?;
        doc.has_many.push(HasMany {
            name,
            table: cfg.table,
            fk: cfg.fk,
            parent: cfg.parent,
            template: None,
        });
    }
    sort_groups(path, &mut doc.has_many)?;
    // Templates: root groups from the document's own slot, sub-groups from their parent's template.
    for i in 0..doc.has_many.len() {
        let name = doc.has_many[i].name.clone();
        let template = match doc.has_many[i].parent.clone() {
            None => {
                let t = group_template(doc.template.get(&name));
                doc.template.insert(name, Value::Array(Vec::new()));
                t
            }
            Some(parent) => {
                doc.template.remove(&name);
                let parent_template = doc.has_many.iter().find(|g| g.name == parent).and_then(|g| g.template.clone());
                group_template(parent_template.as_ref().and_then(|t| t.get(&name)))
            }
        };
        doc.has_many[i].template = template;
    }

    for (name, v) in many_to_many {
        let cfg: ManyToManyConfig = from_value(path, v)?;
        let template = group_template(doc.template.get(&name));
        doc.template.insert(name.clone(), Value::Array(Vec::new()));
        doc.many_to_many.push(ManyToMany { name, config: cfg, template });
    }

    if let Some(tree) = &doc.tree {
        doc.template.insert(tree.field.clone(), Value::Array(Vec::new()));
    }

    Ok(doc)
}

/// Filter documents extend the transformation document; its own entries come first.
pub fn merge_filter_document(doc: &mut Document, filter: FilterDocumentConfig) {
    for f in filter.filterable {
        if !doc.filterable.contains(&f) {
            doc.filterable.push(f);
        }
    }
    for f in filter.searchable {
        if !doc.searchable.contains(&f) {
            doc.searchable.push(f);
        }
    }
    for (field, rule) in filter.rules {
        doc.rules.entry(field).or_insert(rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Result<Document, ConfigError> {
        let doc = parse_document("test.json", v)?;
        validate("test.json", &doc)?;
        Ok(doc)
    }

    #[test]
    fn reserved_keys_are_lifted_out_of_the_template() {
        let doc = parse(json!({
            "id": null,
            "name": "",
            "filterable": ["name"],
            "searchable": ["name"],
            "summary": ["price"],
            "price": 0
        }))
        .unwrap();
        assert_eq!(doc.template.keys().collect::<Vec<_>>(), vec!["id", "name", "price"]);
        assert_eq!(doc.filterable, vec!["name"]);
        assert_eq!(doc.summary, vec!["price"]);
    }

    #[test]
    fn field_config_with_column_and_rules() {
        let doc = parse(json!({
            "title": {"column": "name", "default": "", "rules": {"required": true, "max_length": 10}}
        }))
        .unwrap();
        assert_eq!(doc.column_for("title"), "name");
        assert_eq!(doc.template["title"], json!(""));
        assert_eq!(doc.rules["title"].required, Some(true));
    }

    #[test]
    fn relations_are_parsed_in_dependency_order() {
        let doc = parse(json!({
            "id": null,
            "variants": [{"id": null, "name": "", "prices": [{"amount": 0}]}],
            "tags": [],
            "category": {"belongs_to": {"table": "categories", "fk": "category_id", "fields": {"id": null, "name": ""}}},
            "has_many": {
                "prices": {"table": "variant_prices", "fk": "variant_id", "parent": "variants"},
                "variants": {"table": "product_variants", "fk": "product_id"}
            },
            "many_to_many": {
                "tags": {"table": "product_tags", "fk_1": "product_id", "fk_2": "tag_id", "target": "tags"}
            }
        }))
        .unwrap();
        let names: Vec<_> = doc.has_many.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["variants", "prices"]);
        assert_eq!(doc.template["variants"], json!([]));
        assert!(!doc.template.contains_key("prices"));
        assert_eq!(doc.has_many_group("prices").unwrap().template.as_ref().unwrap()["amount"], json!(0));
        assert_eq!(doc.belongs_to[0].key, "id");
        assert_eq!(doc.template["category"], json!({"id": null, "name": ""}));
        assert_eq!(doc.many_to_many[0].config.target.as_deref(), Some("tags"));
        assert_eq!(doc.scalar_fields().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn unsupported_relation_kind_is_rejected() {
        let err = parse(json!({"owner": {"has_one": {"table": "owners"}}})).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn unknown_descriptor_keys_are_rejected() {
        let err = parse(json!({
            "has_many": {"variants": {"table": "product_variants", "fk": "product_id", "ft": "products"}}
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn non_object_document_is_malformed() {
        assert!(matches!(parse(json!([1, 2])), Err(ConfigError::Malformed { .. })));
    }

    #[test]
    fn duplicate_forms() {
        let doc = parse(json!({"variants": [], "has_many": {"variants": {"table": "v", "fk": "p_id"}}, "duplicate": true})).unwrap();
        assert_eq!(doc.duplicate, Some(DuplicateConfig::Enabled(true)));
        let doc = parse(json!({
            "variants": [],
            "has_many": {"variants": {"table": "v", "fk": "p_id"}},
            "duplicate": {"variants": {"key": "size", "values": ["S", "M"]}}
        }))
        .unwrap();
        match doc.duplicate {
            Some(DuplicateConfig::Groups(g)) => assert_eq!(g["variants"].key.as_deref(), Some("size")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn filter_document_merges_without_duplicates() {
        let mut doc = parse(json!({"name": "", "filterable": ["name"]})).unwrap();
        merge_filter_document(
            &mut doc,
            FilterDocumentConfig {
                filterable: vec!["name".into(), "status".into()],
                searchable: vec!["name".into()],
                rules: Default::default(),
            },
        );
        assert_eq!(doc.filterable, vec!["name", "status"]);
        assert_eq!(doc.searchable, vec!["name"]);
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DocumentLoader::new(dir.path());
        let resource = Resource::catalog("product").unwrap();
        let err = loader.load(&resource, Direction::Response, "find").await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[tokio::test]
    async fn loads_from_path_convention() {
        let dir = tempfile::tempdir().unwrap();
        let resource = Resource::catalog("product").unwrap();
        let loader = DocumentLoader::new(dir.path());
        let path = loader.transformer_path(&resource, Direction::Response, "find");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"id": null, "name": ""}"#).unwrap();
        let filter = loader.filter_path(&resource, "find");
        std::fs::create_dir_all(filter.parent().unwrap()).unwrap();
        std::fs::write(&filter, r#"{"searchable": ["name"]}"#).unwrap();

        let doc = loader.load(&resource, Direction::Response, "find").await.unwrap();
        assert!(path.ends_with("transformers/response/products/find.json"));
        assert_eq!(doc.searchable, vec!["name"]);
    }
}
