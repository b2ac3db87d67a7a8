//! Change subscription tests
//!
//! A subscriber first receives the matching documents as `Current` events,
//! then every later change in sequence order with nothing skipped or
//! repeated.

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use tempfile::TempDir;
use tierdb::notify::EventReceiver;
use tierdb::{
    Attributes, ChangeEvent, ChangeKind, Collection, Database, DocumentId, EngineConfig, Patch,
    SubscriptionFilter,
};
use tokio::sync::mpsc;

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::new(dir.path());
    config.maintenance.enabled = false;
    config
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

fn id(raw: &str) -> DocumentId {
    DocumentId::parse(raw).unwrap()
}

fn drain(rx: &mut EventReceiver) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_current_state_then_live_changes() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();
    db.create(id("USER_1"), attrs(json!({"name": "Alice"}))).unwrap();
    db.create(id("ORDER_1"), attrs(json!({"total": 3}))).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let filter = SubscriptionFilter::collection(Collection::new("USER").unwrap());
    let _handle = db.subscribe(filter, "conn-1", tx).unwrap();

    db.update(&id("USER_1"), Patch::new().set("name", "Bob")).unwrap();
    db.create(id("USER_2"), attrs(json!({"name": "Carol"}))).unwrap();
    db.delete(&id("USER_1")).unwrap();
    db.create(id("ORDER_2"), attrs(json!({"total": 5}))).unwrap();

    let events = drain(&mut rx);
    let summary: Vec<(ChangeKind, &str, u64)> = events
        .iter()
        .map(|e| (e.kind, e.id.as_str(), e.sequence))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ChangeKind::Current, "USER_1", 1),
            (ChangeKind::Update, "USER_1", 3),
            (ChangeKind::Create, "USER_2", 4),
            (ChangeKind::Delete, "USER_1", 5),
        ]
    );

    let update = &events[1];
    assert_eq!(
        update.previous.as_ref().and_then(|d| d.get("name").cloned()),
        Some(json!("Alice"))
    );
    assert!(update.patch.is_some());
}

#[test]
fn test_pattern_filter() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let filter = SubscriptionFilter::collection(Collection::new("USER").unwrap())
        .with_pattern(attrs(json!({"role": "admin"})));
    db.subscribe(filter, "conn-1", tx).unwrap();

    db.create(id("USER_1"), attrs(json!({"role": "admin"}))).unwrap();
    db.create(id("USER_2"), attrs(json!({"role": "user"}))).unwrap();

    let ids: Vec<String> = drain(&mut rx).into_iter().map(|e| e.id.to_string()).collect();
    assert_eq!(ids, vec!["USER_1".to_string()]);
}

#[test]
fn test_single_document_subscription() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();
    db.create(id("USER_1"), attrs(json!({"v": 1}))).unwrap();
    db.create(id("USER_2"), attrs(json!({"v": 1}))).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    db.subscribe(SubscriptionFilter::document(id("USER_2")), "conn-1", tx)
        .unwrap();
    db.update(&id("USER_1"), Patch::new().set("v", 2)).unwrap();
    db.update(&id("USER_2"), Patch::new().set("v", 2)).unwrap();

    let kinds: Vec<ChangeKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Current, ChangeKind::Update]);
}

#[test]
fn test_disconnect_and_dropped_receiver() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir)).unwrap();
    let users = Collection::new("USER").unwrap();

    let (tx1, rx1) = mpsc::unbounded_channel();
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let (tx3, mut rx3) = mpsc::unbounded_channel();
    db.subscribe(SubscriptionFilter::collection(users.clone()), "conn-1", tx1)
        .unwrap();
    db.subscribe(SubscriptionFilter::collection(users.clone()), "conn-2", tx2)
        .unwrap();
    let handle = db
        .subscribe(SubscriptionFilter::collection(users), "conn-3", tx3)
        .unwrap();
    assert_eq!(db.stats().subscriptions, 3);

    assert_eq!(db.disconnect("conn-2"), 1);
    drop(rx1);
    db.create(id("USER_1"), attrs(json!({}))).unwrap();

    // conn-1's closed channel is noticed on delivery
    assert_eq!(db.stats().subscriptions, 1);
    assert_eq!(db.stats().metrics.subscriptions_dropped, 1);

    assert!(handle.unsubscribe());
    db.create(id("USER_2"), attrs(json!({}))).unwrap();
    assert_eq!(drain(&mut rx3).len(), 1);
}

#[test]
fn test_concurrent_writers_deliver_in_order() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(config(&dir)).unwrap());

    let (tx, mut rx) = mpsc::unbounded_channel();
    db.subscribe(
        SubscriptionFilter::collection(Collection::new("USER").unwrap()),
        "conn-1",
        tx,
    )
    .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for n in 0..25 {
                    db.create(id(&format!("USER_{}-{}", t, n)), attrs(json!({"t": t})))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let sequences: Vec<u64> = drain(&mut rx).iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=100).collect::<Vec<_>>());
}
