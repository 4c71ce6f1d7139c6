mod common;

use common::{fixture, fixture_with, row};
use resource_sdk::{AppError, MemoryStore, Resource, ResourceKind};
use serde_json::{json, Value};
use std::collections::HashMap;

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn products() -> Resource {
    Resource::catalog("product").unwrap()
}

#[tokio::test]
async fn create_then_find_round_trips_every_relation() {
    let f = fixture();
    f.seed("categories", json!({"name": "Tops"})).await;
    f.seed("tags", json!({"label": "sale"})).await;
    f.seed("tags", json!({"label": "new"})).await;

    let created = f
        .crud()
        .create(
            &products(),
            &row(json!({
                "name": "Blue Shirt",
                "price": 12,
                "category_id": 1,
                "variants": [{"size": "S", "prices": [{"amount": 10}, {"amount": 11}]}, {"size": "M"}],
                "tags": [2, 1]
            })),
        )
        .await
        .unwrap();
    assert_eq!(created["id"], json!(1));
    assert_eq!(created["slug"], json!("blue-shirt"));

    let found = f.crud().find(&products(), "1").await.unwrap();
    assert_eq!(
        found.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["id", "name", "slug", "price", "category", "variants", "tags"]
    );
    assert_eq!(
        Value::Object(found.clone()),
        json!({
            "id": 1,
            "name": "Blue Shirt",
            "slug": "blue-shirt",
            "price": 12,
            "category": {"id": 1, "name": "Tops"},
            "variants": [
                {"id": 1, "size": "S", "prices": [{"id": 1, "amount": 10}, {"id": 2, "amount": 11}]},
                {"id": 2, "size": "M", "prices": []}
            ],
            "tags": [{"id": 2, "label": "new"}, {"id": 1, "label": "sale"}]
        })
    );

    let again = f.crud().find(&products(), "1").await.unwrap();
    assert_eq!(found, again);
    assert_eq!(f.crud().find_by_slug(&products(), "blue-shirt").await.unwrap(), found);
}

#[tokio::test]
async fn failed_validation_writes_nothing() {
    let f = fixture();
    let err = f
        .crud()
        .create(&products(), &row(json!({"price": -3, "variants": [{"size": "S"}], "tags": [1]})))
        .await
        .unwrap_err();
    match err {
        AppError::Validation(errors) => {
            let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
            assert_eq!(fields, vec!["name", "price"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    for table in ["products", "product_variants", "product_tags"] {
        assert!(f.store.rows(table).is_empty(), "{} should be empty", table);
    }
}

#[tokio::test]
async fn update_replaces_given_groups_and_keeps_the_rest() {
    let f = fixture();
    f.crud()
        .create(
            &products(),
            &row(json!({
                "name": "Shirt",
                "variants": [{"size": "A", "prices": [{"amount": 1}]}, {"size": "B"}],
                "tags": [5]
            })),
        )
        .await
        .unwrap();

    f.crud()
        .update(&products(), "1", &row(json!({"variants": [{"size": "C"}]})))
        .await
        .unwrap();
    let found = f.crud().find(&products(), "1").await.unwrap();
    assert_eq!(found["variants"], json!([{"id": 3, "size": "C", "prices": []}]));
    assert!(f.store.rows("variant_prices").is_empty());
    assert_eq!(f.store.rows("product_tags").len(), 1);

    let out = f
        .crud()
        .update(&products(), "1", &row(json!({"name": "Green Shirt", "price": 30})))
        .await
        .unwrap();
    assert_eq!(out["slug"], json!("green-shirt"));
    let found = f.crud().find(&products(), "1").await.unwrap();
    assert_eq!(found["price"], json!(30));
    assert_eq!(found["variants"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn update_of_unknown_id_is_not_found() {
    let f = fixture();
    let err = f
        .crud()
        .update(&products(), "9", &row(json!({"price": 1})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn second_page_of_twenty_five() {
    let f = fixture();
    for i in 1..=25 {
        f.seed("products", json!({"name": format!("p{}", i), "slug": format!("p{}", i), "price": i}))
            .await;
    }
    let listing = f
        .crud()
        .find_all(&products(), &params(&[("page", "2"), ("size", "10")]))
        .await
        .unwrap();
    assert_eq!(listing.rows.len(), 10);
    assert_eq!(listing.query.pagination.page, 2);
    assert_eq!(listing.query.pagination.total, 25);
    assert_eq!(listing.query.pagination.total_pages, 3);
    assert_eq!(listing.rows[0]["id"], json!(15));
    assert_eq!(listing.summary, json!({"count": 10, "price": 105}));
}

#[tokio::test]
async fn pages_past_the_end_are_empty() {
    let f = fixture();
    f.seed("products", json!({"name": "p1", "slug": "p1", "price": 1})).await;
    let listing = f
        .crud()
        .find_all(&products(), &params(&[("page", "18446744073709551615")]))
        .await
        .unwrap();
    assert!(listing.rows.is_empty());
    assert_eq!(listing.query.pagination.page, u64::MAX);
    assert_eq!(listing.query.pagination.total, 1);
}

#[tokio::test]
async fn filters_search_and_order() {
    let f = fixture();
    f.seed("categories", json!({"name": "Tops"})).await;
    for i in 1..=25 {
        let category = if i % 5 == 0 { json!(1) } else { Value::Null };
        f.seed(
            "products",
            json!({"name": format!("p{}", i), "slug": format!("p{}", i), "price": i, "category_id": category}),
        )
        .await;
    }

    let listing = f.crud().find_all(&products(), &params(&[("price_gte", "20")])).await.unwrap();
    assert_eq!(listing.query.pagination.total, 6);
    assert_eq!(listing.query.filter, row(json!({"price_gte": "20"})));

    let listing = f.crud().find_all(&products(), &params(&[("search", "P2")])).await.unwrap();
    assert_eq!(listing.query.pagination.total, 7);
    assert_eq!(listing.query.search.as_deref(), Some("P2"));

    let listing = f
        .crud()
        .find_all(&products(), &params(&[("category.name", "Tops"), ("order_by", "price"), ("order", "asc")]))
        .await
        .unwrap();
    let prices: Vec<&Value> = listing.rows.iter().map(|r| &r["price"]).collect();
    assert_eq!(prices, vec![&json!(5), &json!(10), &json!(15), &json!(20), &json!(25)]);
    assert_eq!(listing.rows[0]["category"], json!({"id": 1, "name": "Tops"}));

    // Filter documents extend the transformation document.
    let listing = f.crud().find_all(&products(), &params(&[("slug", "p7")])).await.unwrap();
    assert_eq!(listing.rows.len(), 1);
    assert_eq!(listing.rows[0]["category"], Value::Null);
}

#[tokio::test]
async fn duplicate_expansion_by_values() {
    let f = fixture();
    let kits = Resource::catalog("kit").unwrap();
    f.crud()
        .create(&kits, &row(json!({"name": "Kit", "parts": [{"size": "", "qty": 2}]})))
        .await
        .unwrap();
    let parts = f.store.rows("kit_parts");
    let sizes: Vec<&Value> = parts.iter().map(|p| &p["size"]).collect();
    assert_eq!(sizes, vec![&json!("S"), &json!("M"), &json!("L")]);
    assert!(parts.iter().all(|p| p["qty"] == json!(2) && p["kit_id"] == json!(1)));

    f.crud()
        .create(&kits, &row(json!({"name": "Single", "duplicate": false, "parts": [{"size": "XL"}]})))
        .await
        .unwrap();
    assert_eq!(f.store.rows("kit_parts").len(), 4);
}

#[tokio::test]
async fn duplicate_seeding_uses_the_default_entry_else_the_first() {
    let f = fixture();
    let bundles = Resource::catalog("bundle").unwrap();
    f.crud()
        .create(
            &bundles,
            &row(json!({"name": "B1", "items": [{"sku": "a"}, {"sku": "b", "color": "red", "default": true}]})),
        )
        .await
        .unwrap();
    let items = f.store.rows("bundle_items");
    assert_eq!(items[0]["color"], json!("red"));
    assert!(!items[0].contains_key("default"));

    f.crud()
        .create(&bundles, &row(json!({"name": "B2", "items": [{"sku": "c", "color": "blue"}, {"sku": "d"}]})))
        .await
        .unwrap();
    let items = f.store.rows("bundle_items");
    assert_eq!(items[3]["color"], json!("blue"));
    assert_eq!(items[3]["sku"], json!("d"));
}

#[tokio::test]
async fn duplicate_slug_is_a_client_error_and_persists_nothing() {
    let f = fixture_with(MemoryStore::new().with_unique("products", "slug"));
    let input = row(json!({"name": "Shirt", "variants": [{"size": "S"}]}));
    f.crud().create(&products(), &input).await.unwrap();

    let err = f.crud().create(&products(), &input).await.unwrap_err();
    assert!(matches!(err, AppError::Constraint(_)));
    assert!(err.is_client_error());
    assert_eq!(f.store.rows("products").len(), 1);
    assert_eq!(f.store.rows("product_variants").len(), 1);
}

#[tokio::test]
async fn delete_and_delete_by_query() {
    let f = fixture();
    for name in ["a", "b", "b"] {
        f.seed("products", json!({"name": name})).await;
    }
    let err = f.crud().delete_by_query(&products(), &params(&[("price", "1")])).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let (deleted, applied) = f.crud().delete_by_query(&products(), &params(&[("name", "b")])).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(applied, row(json!({"name": "b"})));

    f.crud().delete(&products(), "1").await.unwrap();
    assert!(matches!(f.crud().delete(&products(), "1").await, Err(AppError::NotFound(_))));
    assert!(matches!(f.crud().find(&products(), "1").await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn comments_thread_their_replies() {
    let f = fixture();
    let comments = Resource::new(ResourceKind::Comment, "product").unwrap();
    assert_eq!(comments.table, "product_comments");
    f.seed("product_comments", json!({"body": "root", "parent_id": null})).await;
    f.seed("product_comments", json!({"body": "reply", "parent_id": 1})).await;
    f.seed("product_comments", json!({"body": "deep", "parent_id": 2})).await;
    f.seed("product_comments", json!({"body": "other", "parent_id": null})).await;

    let root = f.crud().find(&comments, "1").await.unwrap();
    assert_eq!(
        root["childs"],
        json!([{"id": 2, "body": "reply", "parent_id": 1, "childs": [
            {"id": 3, "body": "deep", "parent_id": 2, "childs": []}
        ]}])
    );

    let flat = f.crud().find_all(&comments, &params(&[])).await.unwrap();
    assert!(flat.rows.iter().all(|r| r["childs"] == json!([])));

    let threaded = f
        .crud()
        .find_all(&comments, &params(&[("include_childs", "1")]))
        .await
        .unwrap();
    let by_id: HashMap<i64, &Value> = threaded
        .rows
        .iter()
        .map(|r| (r["id"].as_i64().unwrap(), &r["childs"]))
        .collect();
    assert_eq!(by_id[&1].as_array().map(Vec::len), Some(1));
    assert_eq!(by_id[&4], &json!([]));
}

#[tokio::test]
async fn missing_document_is_a_config_error() {
    let f = fixture();
    let widgets = Resource::catalog("widget").unwrap();
    let err = f.crud().find_all(&widgets, &params(&[])).await.unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
    assert!(!err.is_client_error());
}
