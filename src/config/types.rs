//! Raw document types matching the JSON files under `transformers/` and `filters/`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Expected JSON type of an input field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn matches(&self, v: &Value) -> bool {
        match self {
            FieldType::String => v.is_string(),
            FieldType::Integer => v.is_i64() || v.is_u64(),
            FieldType::Number => v.is_number(),
            FieldType::Boolean => v.is_boolean(),
            FieldType::Array => v.is_array(),
            FieldType::Object => v.is_object(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default, rename = "type")]
    pub type_: Option<FieldType>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<Pattern>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

/// A `pattern` rule, compiled once when the document is parsed.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    compiled: Result<Regex, regex::Error>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source);
        Pattern { source, compiled }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The compiled expression; the error is reported by document validation.
    pub fn regex(&self) -> Result<&Regex, &regex::Error> {
        self.compiled.as_ref()
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.regex().map(|re| re.is_match(s)).unwrap_or(false)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Pattern::new)
    }
}

/// `{"column": "...", "default": ..., "rules": {...}}` field entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub rules: Option<ValidationRule>,
}

/// `{"belongs_to": {...}}` field entry: joined into the primary query.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BelongsToConfig {
    pub table: String,
    /// Our column holding the related row's key.
    pub fk: String,
    #[serde(default = "default_key")]
    pub key: String,
    /// Related columns to expose, with their defaults.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Entry of the `has_many` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HasManyConfig {
    pub table: String,
    /// Child column referencing the owner's generated id.
    pub fk: String,
    /// Owning sibling group. Absent means the resource row owns the group.
    #[serde(default)]
    pub parent: Option<String>,
}

/// Entry of the `many_to_many` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManyToManyConfig {
    /// Join table.
    pub table: String,
    /// Join column referencing the resource row.
    pub fk_1: String,
    /// Join column referencing the secondary entity.
    pub fk_2: String,
    /// Secondary entity table, joined on read. Without it the join rows themselves are attached.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_key")]
    pub target_key: String,
}

/// `tree` section: rows of the same table nested under their parent row.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    #[serde(default = "default_parent_key")]
    pub parent_key: String,
    #[serde(default = "default_children_field")]
    pub field: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// How one has-many group is expanded from its template entry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuplicateRule {
    /// Column set to each expansion value.
    #[serde(default)]
    pub key: Option<String>,
    /// Static expansion values.
    #[serde(default)]
    pub values: Option<Vec<Value>>,
    /// Input field holding the expansion values.
    #[serde(default)]
    pub from: Option<String>,
    /// Plain number of copies.
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DuplicateConfig {
    /// `true`: seed every root has-many group from its template.
    Enabled(bool),
    Groups(BTreeMap<String, DuplicateRule>),
}

/// `filters/{table}/{operation}.json`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterDocumentConfig {
    #[serde(default)]
    pub filterable: Vec<String>,
    #[serde(default)]
    pub searchable: Vec<String>,
    #[serde(default)]
    pub rules: BTreeMap<String, ValidationRule>,
}

fn default_key() -> String {
    "id".into()
}

fn default_parent_key() -> String {
    "parent_id".into()
}

fn default_children_field() -> String {
    "childs".into()
}

fn default_max_depth() -> usize {
    8
}
