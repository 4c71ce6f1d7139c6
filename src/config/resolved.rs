//! Parsed transformation document: reserved sections lifted into typed fields, the rest kept as the row template.

use crate::config::{DuplicateConfig, ManyToManyConfig, TreeConfig, ValidationRule};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// A row: ordered column name -> value.
pub type Row = Map<String, Value>;

/// Keys with structural meaning; never part of a row payload.
pub const RESERVED_KEYS: &[&str] = &[
    "filterable",
    "searchable",
    "has_many",
    "many_to_many",
    "duplicate",
    "tree",
    "summary",
];

#[derive(Clone, Debug)]
pub struct BelongsTo {
    /// Output slot, also the join alias.
    pub field: String,
    pub table: String,
    pub fk: String,
    pub key: String,
    pub fields: Row,
}

#[derive(Clone, Debug)]
pub struct HasMany {
    pub name: String,
    pub table: String,
    pub fk: String,
    pub parent: Option<String>,
    /// Shape of one child in responses. None returns child rows as stored.
    pub template: Option<Row>,
}

#[derive(Clone, Debug)]
pub struct ManyToMany {
    pub name: String,
    pub config: ManyToManyConfig,
    pub template: Option<Row>,
}

#[derive(Clone, Debug, Default)]
pub struct Document {
    /// Field defaults in declaration order. Relation slots hold their empty default.
    pub template: Row,
    /// Output field -> source column, only where they differ.
    pub columns: HashMap<String, String>,
    pub rules: BTreeMap<String, ValidationRule>,
    pub filterable: Vec<String>,
    pub searchable: Vec<String>,
    pub belongs_to: Vec<BelongsTo>,
    /// In dependency order: a group always comes after its parent group.
    pub has_many: Vec<HasMany>,
    pub many_to_many: Vec<ManyToMany>,
    pub duplicate: Option<DuplicateConfig>,
    pub tree: Option<TreeConfig>,
    pub summary: Vec<String>,
}

impl Document {
    /// Source column for an output field.
    pub fn column_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }

    pub fn has_many_group(&self, name: &str) -> Option<&HasMany> {
        self.has_many.iter().find(|g| g.name == name)
    }

    /// Groups owned directly by `parent` (None = the resource row).
    pub fn children_of<'a>(&'a self, parent: Option<&'a str>) -> impl Iterator<Item = &'a HasMany> + 'a {
        self.has_many.iter().filter(move |g| g.parent.as_deref() == parent)
    }

    pub fn belongs_to_field(&self, field: &str) -> Option<&BelongsTo> {
        self.belongs_to.iter().find(|b| b.field == field)
    }

    pub fn is_relation_slot(&self, field: &str) -> bool {
        self.has_many.iter().any(|g| g.name == field)
            || self.many_to_many.iter().any(|g| g.name == field)
            || self.belongs_to.iter().any(|b| b.field == field)
            || self.tree.as_ref().map(|t| t.field == field).unwrap_or(false)
    }

    /// Plain (non-relation) fields, usable for ordering.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &str> {
        self.template
            .keys()
            .map(String::as_str)
            .filter(move |k| !self.is_relation_slot(k))
    }
}
