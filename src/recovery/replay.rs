//! WAL replay for recovery
//!
//! Entries are grouped into their transaction batches and a batch is applied
//! only once all of its entries have been read, so a batch cut short at the
//! end of the log never becomes visible. Any damage inside the log aborts
//! replay with an integrity failure.

use std::sync::Arc;

use crate::cache::TieredStore;
use crate::document::{Document, DocumentId};
use crate::errors::DbResult;
use crate::wal::{OpKind, WalEntry, WalResult};

/// Receives replayed entries
pub trait ReplayTarget {
    /// Sequence of the version already persisted for `id`, if any. Entries
    /// at or below it are skipped.
    fn stored_sequence(&self, id: &DocumentId) -> Option<u64>;

    /// Apply one entry
    fn apply_entry(&mut self, entry: &WalEntry) -> DbResult<()>;
}

impl ReplayTarget for TieredStore {
    fn stored_sequence(&self, id: &DocumentId) -> Option<u64> {
        self.segments().sequence_of(id)
    }

    fn apply_entry(&mut self, entry: &WalEntry) -> DbResult<()> {
        let document = entry
            .post_image()
            .map(|attributes| Arc::new(Document::new(entry.target.clone(), attributes.clone())));
        self.apply(entry.target.clone(), document, entry.sequence);
        Ok(())
    }
}

/// Statistics from WAL replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Entries applied to the target
    pub applied: u64,
    /// Entries already reflected by persisted state
    pub skipped: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    /// Entries of an incomplete trailing batch that were not applied
    pub discarded: u64,
    /// Sequence of the last complete batch, 0 if none was read
    pub last_sequence: u64,
}

/// Applies WAL entries to a `ReplayTarget`
pub struct WalReplayer;

impl WalReplayer {
    /// Replay `entries` (in sequence order) into `target`
    pub fn replay<I, T>(entries: I, target: &mut T) -> DbResult<ReplayStats>
    where
        I: IntoIterator<Item = WalResult<WalEntry>>,
        T: ReplayTarget + ?Sized,
    {
        let mut stats = ReplayStats::default();
        let mut batch: Vec<WalEntry> = Vec::new();

        for entry in entries {
            let entry = entry?;
            let complete = entry.batch_len as usize <= batch.len() + 1;
            batch.push(entry);
            if complete {
                Self::apply_batch(&mut batch, target, &mut stats)?;
            }
        }

        stats.discarded = batch.len() as u64;
        Ok(stats)
    }

    fn apply_batch<T>(batch: &mut Vec<WalEntry>, target: &mut T, stats: &mut ReplayStats) -> DbResult<()>
    where
        T: ReplayTarget + ?Sized,
    {
        for entry in batch.drain(..) {
            stats.last_sequence = entry.sequence;
            if target
                .stored_sequence(&entry.target)
                .is_some_and(|stored| entry.sequence <= stored)
            {
                stats.skipped += 1;
                continue;
            }
            target.apply_entry(&entry)?;
            stats.applied += 1;
            match entry.kind {
                OpKind::Create => stats.creates += 1,
                OpKind::Update => stats.updates += 1,
                OpKind::Delete => stats.deletes += 1,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Attributes;
    use crate::errors::DbError;
    use crate::wal::{WalError, WalPayload};
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockTarget {
        stored: HashMap<DocumentId, u64>,
        state: HashMap<DocumentId, Option<Attributes>>,
    }

    impl ReplayTarget for MockTarget {
        fn stored_sequence(&self, id: &DocumentId) -> Option<u64> {
            self.stored.get(id).copied()
        }

        fn apply_entry(&mut self, entry: &WalEntry) -> DbResult<()> {
            self.state
                .insert(entry.target.clone(), entry.post_image().cloned());
            Ok(())
        }
    }

    fn attrs(name: &str) -> Attributes {
        json!({ "name": name }).as_object().cloned().unwrap()
    }

    fn entry(seq: u64, txn: Option<u64>, batch_len: u32, id: &str, name: Option<&str>) -> WalEntry {
        let (kind, payload) = match name {
            Some(n) => (OpKind::Create, WalPayload::Document { attributes: attrs(n) }),
            None => (OpKind::Delete, WalPayload::Tombstone),
        };
        WalEntry {
            sequence: seq,
            txn_id: txn,
            batch_len,
            kind,
            target: DocumentId::parse(id).unwrap(),
            payload,
        }
    }

    #[test]
    fn test_replay_applies_in_order() {
        let mut target = MockTarget::default();
        let entries = vec![
            Ok(entry(1, None, 1, "USER_1", Some("Alice"))),
            Ok(entry(2, None, 1, "USER_2", Some("Bob"))),
            Ok(entry(3, None, 1, "USER_1", None)),
        ];

        let stats = WalReplayer::replay(entries, &mut target).unwrap();
        assert_eq!(stats.applied, 3);
        assert_eq!(stats.creates, 2);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.last_sequence, 3);
        assert_eq!(target.state[&DocumentId::parse("USER_1").unwrap()], None);
    }

    #[test]
    fn test_persisted_versions_are_skipped() {
        let mut target = MockTarget::default();
        target.stored.insert(DocumentId::parse("USER_1").unwrap(), 2);

        let entries = vec![
            Ok(entry(1, None, 1, "USER_1", Some("Alice"))),
            Ok(entry(2, None, 1, "USER_1", Some("Bob"))),
            Ok(entry(3, None, 1, "USER_1", Some("Carol"))),
        ];
        let stats = WalReplayer::replay(entries, &mut target).unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(
            target.state[&DocumentId::parse("USER_1").unwrap()],
            Some(attrs("Carol"))
        );
    }

    #[test]
    fn test_incomplete_trailing_batch_is_not_applied() {
        let mut target = MockTarget::default();
        let entries = vec![
            Ok(entry(1, None, 1, "USER_1", Some("Alice"))),
            Ok(entry(2, Some(7), 2, "ORDER_1", Some("o"))),
        ];

        let stats = WalReplayer::replay(entries, &mut target).unwrap();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.last_sequence, 1);
        assert!(!target.state.contains_key(&DocumentId::parse("ORDER_1").unwrap()));
    }

    #[test]
    fn test_corruption_aborts_replay() {
        let mut target = MockTarget::default();
        let entries = vec![
            Ok(entry(1, None, 1, "USER_1", Some("Alice"))),
            Err(WalError::corruption_at_sequence(2, "checksum mismatch")),
            Ok(entry(3, None, 1, "USER_3", Some("Carol"))),
        ];

        let err = WalReplayer::replay(entries, &mut target).unwrap_err();
        assert!(matches!(err, DbError::IntegrityFailure(_)));
        assert!(!target.state.contains_key(&DocumentId::parse("USER_3").unwrap()));
    }
}
