#![allow(dead_code)]

use resource_sdk::{AppState, CrudService, DocumentLoader, Executor, MemoryStore, PageLimits, Row, Store};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Fixture {
    /// Keeps the documents directory alive for the test.
    pub dir: TempDir,
    pub store: MemoryStore,
    pub state: AppState,
}

impl Fixture {
    pub fn crud(&self) -> &CrudService {
        &self.state.crud
    }

    /// Insert a row directly, bypassing the documents.
    pub async fn seed(&self, table: &str, v: Value) -> Row {
        let mut conn = self.store.acquire().await.unwrap();
        conn.insert(table, &row(v)).await.unwrap()
    }
}

pub fn row(v: Value) -> Row {
    v.as_object().cloned().expect("object")
}

pub fn write_doc(root: &Path, rel: &str, v: Value) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(&v).unwrap()).unwrap();
}

fn product_relations() -> (Value, Value) {
    (
        json!({
            "variants": {"table": "product_variants", "fk": "product_id"},
            "prices": {"table": "variant_prices", "fk": "variant_id", "parent": "variants"}
        }),
        json!({
            "tags": {"table": "product_tags", "fk_1": "product_id", "fk_2": "tag_id", "target": "tags"}
        }),
    )
}

/// Documents for `products` (catalog), `kits` and `bundles` (duplicate expansion) and
/// `product_comments` (threaded).
pub fn write_documents(root: &Path) {
    let (has_many, many_to_many) = product_relations();
    write_doc(
        root,
        "transformers/response/products/find.json",
        json!({
            "id": null,
            "name": "",
            "slug": "",
            "price": 0,
            "category": {"belongs_to": {"table": "categories", "fk": "category_id", "fields": {"id": null, "name": ""}}},
            "variants": [{"id": null, "size": "", "prices": [{"id": null, "amount": 0}]}],
            "tags": [{"id": null, "label": ""}],
            "has_many": has_many.clone(),
            "many_to_many": many_to_many.clone(),
            "filterable": ["name", "price", "category.name"],
            "searchable": ["name"],
            "summary": ["price"]
        }),
    );
    let request = json!({
        "name": {"default": "", "rules": {"required": true, "max_length": 40}},
        "slug": "",
        "price": {"default": 0, "rules": {"type": "number", "minimum": 0}},
        "category_id": null,
        "variants": [],
        "tags": [],
        "has_many": has_many,
        "many_to_many": many_to_many
    });
    write_doc(root, "transformers/request/products/create.json", request.clone());
    let mut update = request;
    update["name"] = json!({"default": "", "rules": {"max_length": 40}});
    write_doc(root, "transformers/request/products/update.json", update);
    write_doc(root, "transformers/request/products/delete.json", json!({"filterable": ["name"]}));
    write_doc(root, "filters/products/find.json", json!({"filterable": ["slug"]}));

    write_doc(
        root,
        "transformers/request/kits/create.json",
        json!({
            "name": "",
            "parts": [],
            "has_many": {"parts": {"table": "kit_parts", "fk": "kit_id"}},
            "duplicate": {"parts": {"key": "size", "values": ["S", "M", "L"]}}
        }),
    );
    write_doc(
        root,
        "transformers/request/bundles/create.json",
        json!({
            "name": "",
            "items": [],
            "has_many": {"items": {"table": "bundle_items", "fk": "bundle_id"}},
            "duplicate": true
        }),
    );

    write_doc(
        root,
        "transformers/response/product_comments/find.json",
        json!({"id": null, "body": "", "parent_id": null, "tree": {"parent_key": "parent_id", "max_depth": 3}}),
    );
    write_doc(
        root,
        "transformers/request/product_comments/create.json",
        json!({"body": {"default": "", "rules": {"required": true}}, "parent_id": null}),
    );
}

pub fn fixture() -> Fixture {
    fixture_with(MemoryStore::new())
}

pub fn fixture_with(store: MemoryStore) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_documents(dir.path());
    let state = AppState::new(
        Arc::new(store.clone()),
        DocumentLoader::new(dir.path()),
        PageLimits::default(),
    );
    Fixture { dir, store, state }
}
