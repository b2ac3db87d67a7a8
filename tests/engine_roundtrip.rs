//! Engine round-trip tests
//!
//! CRUD, queries and references through the public `Database` API, and
//! persistence across a clean shutdown.

use serde_json::{json, Value};
use tempfile::TempDir;
use tierdb::document::reference;
use tierdb::{Attributes, Collection, Database, DbError, DocumentId, EngineConfig, Filter, Patch};

// =============================================================================
// Test Utilities
// =============================================================================

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::new(dir.path());
    config.maintenance.enabled = false;
    config
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().expect("object literal")
}

fn id(raw: &str) -> DocumentId {
    DocumentId::parse(raw).expect("valid id")
}

fn users() -> Collection {
    Collection::new("USER").unwrap()
}

// =============================================================================
// CRUD
// =============================================================================

#[test]
fn test_create_update_get() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    db.create(id("USER_1"), attrs(json!({"name": "Alice", "age": 30})))
        .unwrap();
    db.update(&id("USER_1"), Patch::new().set("name", "Bob").remove("age"))
        .unwrap();

    let doc = db.get(&id("USER_1")).unwrap();
    assert_eq!(doc.get("name"), Some(&json!("Bob")));
    assert_eq!(doc.get("age"), None);
}

#[test]
fn test_replace_drops_missing_fields() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    db.create(id("USER_1"), attrs(json!({"name": "Alice", "age": 30})))
        .unwrap();
    db.replace(&id("USER_1"), attrs(json!({"nick": "al"}))).unwrap();

    let doc = db.get(&id("USER_1")).unwrap();
    assert_eq!(doc.attributes(), &attrs(json!({"nick": "al"})));
}

#[test]
fn test_update_missing_is_not_found() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    let result = db.update(&id("USER_404"), Patch::new().set("x", 1));
    assert!(matches!(result, Err(DbError::NotFound(_))));
}

#[test]
fn test_recreate_after_delete() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    db.create(id("USER_1"), attrs(json!({"v": 1}))).unwrap();
    db.delete(&id("USER_1")).unwrap();
    db.create(id("USER_1"), attrs(json!({"v": 2}))).unwrap();

    assert_eq!(db.get(&id("USER_1")).unwrap().get("v"), Some(&json!(2)));
}

#[test]
fn test_insert_generates_prefixed_id() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    let doc = db.insert(&users(), attrs(json!({"name": "Carol"}))).unwrap();
    assert_eq!(doc.id().type_prefix(), "USER");
    assert_eq!(db.get(doc.id()).unwrap().get("name"), Some(&json!("Carol")));
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_filter_and_count() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    for (i, role) in ["admin", "user", "admin", "user", "user"].iter().enumerate() {
        db.create(
            id(&format!("USER_{}", i)),
            attrs(json!({"role": role, "n": i})),
        )
        .unwrap();
    }
    db.create(id("ORDER_1"), attrs(json!({"role": "admin"}))).unwrap();

    let admins = db
        .get_by_filter(&users(), &Filter::pattern(json!({"role": "admin"})))
        .unwrap();
    let ids: Vec<&str> = admins.iter().map(|d| d.id().as_str()).collect();
    assert_eq!(ids, vec!["USER_0", "USER_2"]);

    assert_eq!(db.count(&users(), &Filter::All).unwrap(), 5);
    let big = Filter::predicate(|doc| doc.get("n").and_then(Value::as_u64).unwrap_or(0) >= 3);
    assert_eq!(db.count(&users(), &big).unwrap(), 2);
}

#[test]
fn test_references_resolve_with_get_by_ids() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    db.create(id("USER_1"), attrs(json!({"name": "Alice"}))).unwrap();
    let order = db
        .create(
            id("ORDER_1"),
            attrs(json!({"owner": reference(&id("USER_1")), "ghost": reference(&id("USER_9"))})),
        )
        .unwrap();

    let refs = order.references();
    let resolved = db.get_by_ids(&refs).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id().as_str(), "USER_1");
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_state_survives_clean_shutdown() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(config(&dir)).unwrap();
        db.create(id("USER_1"), attrs(json!({"name": "Alice"}))).unwrap();
        db.create(id("USER_2"), attrs(json!({"name": "Bob"}))).unwrap();
        db.delete(&id("USER_2")).unwrap();
        db.shutdown().unwrap();
    }

    let db = Database::open(config(&dir)).unwrap();
    assert!(db.recovery_report().was_clean_shutdown);
    assert_eq!(db.get(&id("USER_1")).unwrap().get("name"), Some(&json!("Alice")));
    assert!(matches!(db.get(&id("USER_2")), Err(DbError::NotFound(_))));

    // Sequence numbering continues after the last logged entry
    assert_eq!(db.stats().wal.next_sequence, 4);
}
