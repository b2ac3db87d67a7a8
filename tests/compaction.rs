//! Segment compaction tests
//!
//! Compaction drops superseded versions and tombstoned documents while every
//! live document keeps its latest version, across a restart.

use serde_json::{json, Value};
use tempfile::TempDir;
use tierdb::{Attributes, Collection, Database, DbError, DocumentId, EngineConfig, Filter, Patch};

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::new(dir.path());
    config.maintenance.enabled = false;
    config.segment.max_segment_bytes = 2048;
    config
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

fn id(n: usize) -> DocumentId {
    DocumentId::parse(&format!("USER_{}", n)).unwrap()
}

/// Write several flushed versions of each document, then delete some
fn churn(db: &Database) {
    for n in 0..20 {
        db.create(id(n), attrs(json!({"v": 0, "pad": "x".repeat(64)})))
            .unwrap();
    }
    db.checkpoint().unwrap();
    for round in 1..=3 {
        for n in 0..20 {
            db.update(&id(n), Patch::new().set("v", round)).unwrap();
        }
        db.checkpoint().unwrap();
    }
    for n in 0..10 {
        db.delete(&id(n)).unwrap();
    }
    db.checkpoint().unwrap();
}

#[test]
fn test_compaction_frees_garbage() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();
    churn(&db);

    let before = db.stats().segments;
    assert!(before.garbage_ratio > 0.5);

    let freed = db.compact().unwrap();
    assert!(freed > 0);

    let after = db.stats().segments;
    assert!(after.total_bytes < before.total_bytes);
    assert_eq!(after.live_documents, 10);
    assert_eq!(db.stats().metrics.compactions, 1);

    for n in 0..10 {
        assert!(matches!(db.get(&id(n)), Err(DbError::NotFound(_))));
    }
    for n in 10..20 {
        assert_eq!(db.get(&id(n)).unwrap().get("v"), Some(&json!(3)));
    }
}

#[test]
fn test_compacted_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(config(&dir)).unwrap();
        churn(&db);
        db.compact().unwrap();
        db.shutdown().unwrap();
    }

    let db = Database::open(config(&dir)).unwrap();
    let users = Collection::new("USER").unwrap();
    let listed: Vec<String> = db
        .list(&users)
        .unwrap()
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    let expected: Vec<String> = {
        let mut ids: Vec<String> = (10..20).map(|n| format!("USER_{}", n)).collect();
        ids.sort();
        ids
    };
    assert_eq!(listed, expected);
    assert_eq!(db.count(&users, &Filter::pattern(json!({"v": 3}))).unwrap(), 10);
}

#[test]
fn test_writes_continue_after_compaction() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();
    churn(&db);
    db.compact().unwrap();

    db.create(id(0), attrs(json!({"v": 99}))).unwrap();
    db.update(&id(15), Patch::new().set("v", 42)).unwrap();
    db.checkpoint().unwrap();

    assert_eq!(db.get(&id(0)).unwrap().get("v"), Some(&json!(99)));
    assert_eq!(db.get(&id(15)).unwrap().get("v"), Some(&json!(42)));
}
