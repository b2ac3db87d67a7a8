//! Crash recovery tests
//!
//! A crash is simulated by dropping the `Database` without `shutdown()`:
//! dirty cache entries are lost and only the WAL and segments remain.

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;
use tierdb::wal::{PendingEntry, WalOptions, WalWriter};
use tierdb::{Attributes, Database, DbError, DocumentId, EngineConfig, Patch};

// =============================================================================
// Test Utilities
// =============================================================================

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::new(dir.path());
    config.maintenance.enabled = false;
    config
}

fn encrypted(dir: &TempDir, secret: &str) -> EngineConfig {
    let mut config = config(dir);
    config.encryption.enabled = true;
    config.encryption.secret = Some(secret.to_string());
    config
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

fn id(raw: &str) -> DocumentId {
    DocumentId::parse(raw).unwrap()
}

fn segment_files(config: &EngineConfig) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(config.segments_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map(|x| x == "dat").unwrap_or(false))
        .collect();
    files.sort();
    files
}

// =============================================================================
// WAL replay
// =============================================================================

#[test]
fn test_committed_update_survives_crash() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(config(&dir)).unwrap();
        db.create(id("USER_1"), attrs(json!({"name": "Alice"}))).unwrap();
        db.update(&id("USER_1"), Patch::new().set("name", "Bob")).unwrap();
        // crash: nothing flushed to segments
    }

    let db = Database::open(config(&dir)).unwrap();
    let report = db.recovery_report();
    assert!(!report.was_clean_shutdown);
    assert_eq!(report.replayed_entries, 2);
    assert_eq!(db.get(&id("USER_1")).unwrap().get("name"), Some(&json!("Bob")));
}

#[test]
fn test_recovery_is_repeatable() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(config(&dir)).unwrap();
        for n in 0..10 {
            db.create(id(&format!("USER_{}", n)), attrs(json!({"n": n})))
                .unwrap();
        }
        db.delete(&id("USER_3")).unwrap();
    }

    for _ in 0..3 {
        let db = Database::open(config(&dir)).unwrap();
        assert_eq!(db.recovery_report().next_sequence, 12);
        assert!(matches!(db.get(&id("USER_3")), Err(DbError::NotFound(_))));
        assert_eq!(db.get(&id("USER_9")).unwrap().get("n"), Some(&json!(9)));
    }
}

#[test]
fn test_incomplete_trailing_batch_is_discarded() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    {
        let options = WalOptions {
            policy: config.wal.durability,
            max_segment_bytes: config.wal.max_segment_bytes,
            cipher: tierdb::crypto::PayloadCipher::disabled(),
            faults: tierdb::fault::FaultInjector::new(),
            min_next_sequence: 1,
        };
        let (mut wal, _) = WalWriter::open(&config.wal_dir(), options).unwrap();
        wal.append(PendingEntry::create(id("USER_1"), attrs(json!({}))))
            .unwrap();
        wal.append_batch(
            Some(7),
            vec![
                PendingEntry::create(id("ORDER_1"), attrs(json!({}))),
                PendingEntry::create(id("PAYMENT_1"), attrs(json!({}))),
            ],
        )
        .unwrap();
    }

    // Cut the last frame: the batch is now incomplete
    let wal_file = tierdb::wal::list_wal_files(&config.wal_dir())
        .unwrap()
        .pop()
        .unwrap()
        .path;
    let bytes = fs::read(&wal_file).unwrap();
    fs::write(&wal_file, &bytes[..bytes.len() - 3]).unwrap();

    let db = Database::open(config).unwrap();
    assert_eq!(db.recovery_report().wal_discarded_entries, 1);
    assert!(db.get(&id("USER_1")).is_ok());
    assert!(matches!(db.get(&id("ORDER_1")), Err(DbError::NotFound(_))));
    assert!(matches!(db.get(&id("PAYMENT_1")), Err(DbError::NotFound(_))));
    assert_eq!(db.stats().wal.next_sequence, 2);
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn test_damaged_segments_restored_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    {
        let db = Database::open(config.clone()).unwrap();
        for n in 1..=3 {
            db.create(id(&format!("USER_{}", n)), attrs(json!({"n": n})))
                .unwrap();
        }
        db.checkpoint().unwrap();
        db.create(id("USER_4"), attrs(json!({"n": 4}))).unwrap();
        db.update(&id("USER_1"), Patch::new().set("n", 100)).unwrap();
        db.shutdown().unwrap();
    }

    // Damage the first record of the oldest segment
    let first = segment_files(&config).remove(0);
    let mut bytes = fs::read(&first).unwrap();
    bytes[12] ^= 0xff;
    fs::write(&first, bytes).unwrap();

    let db = Database::open(config).unwrap();
    assert_eq!(db.recovery_report().restored_from_snapshot, Some(3));
    assert_eq!(db.get(&id("USER_1")).unwrap().get("n"), Some(&json!(100)));
    assert_eq!(db.get(&id("USER_2")).unwrap().get("n"), Some(&json!(2)));
    assert_eq!(db.get(&id("USER_4")).unwrap().get("n"), Some(&json!(4)));
}

#[test]
fn test_damaged_segments_rebuilt_from_wal_without_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    {
        let db = Database::open(config.clone()).unwrap();
        for n in 1..=3 {
            db.create(id(&format!("USER_{}", n)), attrs(json!({"n": n})))
                .unwrap();
        }
        db.update(&id("USER_2"), Patch::new().set("n", 20)).unwrap();
        db.shutdown().unwrap();
    }
    assert!(!segment_files(&config).is_empty());

    let first = segment_files(&config).remove(0);
    let mut bytes = fs::read(&first).unwrap();
    bytes[12] ^= 0xff;
    fs::write(&first, bytes).unwrap();

    let db = Database::open(config.clone()).unwrap();
    let report = db.recovery_report();
    assert!(report.rebuilt_from_wal);
    assert_eq!(report.restored_from_snapshot, None);
    assert_eq!(report.replayed_entries, 4);
    assert_eq!(report.next_sequence, 5);
    assert_eq!(db.get(&id("USER_1")).unwrap().get("n"), Some(&json!(1)));
    assert_eq!(db.get(&id("USER_2")).unwrap().get("n"), Some(&json!(20)));
    assert_eq!(db.get(&id("USER_3")).unwrap().get("n"), Some(&json!(3)));
}

#[test]
fn test_damaged_segments_without_history_fail_to_open() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.snapshot.retain = 1;
    {
        let db = Database::open(config.clone()).unwrap();
        for n in 1..=3 {
            db.create(id(&format!("USER_{}", n)), attrs(json!({"n": n})))
                .unwrap();
        }
        // Retires the WAL through sequence 3
        db.checkpoint().unwrap();
        db.shutdown().unwrap();
    }
    // Without its snapshot, the WAL no longer reaches back to sequence 1
    fs::remove_dir_all(config.snapshots_dir()).unwrap();
    let first = segment_files(&config).remove(0);
    let mut bytes = fs::read(&first).unwrap();
    bytes[12] ^= 0xff;
    fs::write(&first, bytes).unwrap();

    match Database::open(config) {
        Err(e) => assert!(e.is_integrity(), "expected integrity failure, got {:?}", e),
        Ok(_) => panic!("segments cannot be rebuilt without history"),
    }
}

// =============================================================================
// Encryption
// =============================================================================

#[test]
fn test_encrypted_round_trip() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(encrypted(&dir, "correct horse")).unwrap();
        db.create(id("USER_1"), attrs(json!({"secret": "plans"}))).unwrap();
        db.shutdown().unwrap();
    }

    // Payload bytes never appear in clear on disk
    for file in segment_files(&encrypted(&dir, "correct horse")) {
        let bytes = fs::read(file).unwrap();
        assert!(!bytes.windows(5).any(|w| w == b"plans"));
    }

    let db = Database::open(encrypted(&dir, "correct horse")).unwrap();
    assert_eq!(db.get(&id("USER_1")).unwrap().get("secret"), Some(&json!("plans")));
}

#[test]
fn test_wrong_key_is_integrity_failure() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(encrypted(&dir, "correct horse")).unwrap();
        db.create(id("USER_1"), attrs(json!({"name": "Alice"}))).unwrap();
    }

    match Database::open(encrypted(&dir, "battery staple")) {
        Err(e) => assert!(e.is_integrity(), "expected integrity failure, got {:?}", e),
        Ok(_) => panic!("opening with the wrong key must fail"),
    }
}
