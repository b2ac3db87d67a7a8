//! Hot and cold tiers behind one read path
//!
//! Reads consult the cache first; a miss falls through to the segment store
//! and promotes the result. Writes land in the cache as dirty entries and
//! reach the segment store on eviction or checkpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::document::{Collection, Document, DocumentId};
use crate::errors::DbResult;
use crate::segment::SegmentStore;

use super::entry::{CachedState, EvictionCandidate};
use super::tier::{CacheLookup, CacheTier, EvictionReport};

/// Cache tier plus segment store
pub struct TieredStore {
    cache: CacheTier,
    segments: SegmentStore,
}

impl TieredStore {
    pub fn new(cache: CacheTier, segments: SegmentStore) -> Self {
        Self { cache, segments }
    }

    pub fn cache(&self) -> &CacheTier {
        &self.cache
    }

    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    /// Current version of `id`, from whichever tier holds it
    pub fn resolve(&self, id: &DocumentId) -> DbResult<Option<Arc<Document>>> {
        match self.cache.get(id) {
            CacheLookup::Hit(doc) => return Ok(Some(doc)),
            CacheLookup::Deleted => return Ok(None),
            CacheLookup::Miss => {}
        }

        let Some((attributes, sequence)) = self.segments.load(id)? else {
            return Ok(None);
        };
        let doc = Arc::new(Document::new(id.clone(), attributes));
        if self.cache.promote(Arc::clone(&doc), sequence)
            && self.segments.sequence_of(id) != Some(sequence)
        {
            // A newer version was evicted to disk while we were loading
            self.cache.remove_if_unchanged(id, sequence);
        }
        Ok(Some(doc))
    }

    /// Record a committed mutation as a dirty cache entry
    pub fn apply(&self, id: DocumentId, document: Option<Arc<Document>>, sequence: u64) {
        let state = match document {
            Some(doc) => CachedState::Live(doc),
            None => CachedState::Deleted,
        };
        self.cache.put(id, state, sequence, true);
    }

    /// Run an eviction pass. `before_flush(seq)` must make the WAL durable
    /// through `seq` before the segment write.
    pub fn evict<F>(&self, mut before_flush: F) -> EvictionReport
    where
        F: FnMut(u64) -> DbResult<()>,
    {
        self.cache.evict(|candidate| {
            before_flush(candidate.sequence)?;
            self.write_through(candidate)
        })
    }

    /// Flush every dirty entry without evicting it. Returns the number
    /// written; stops at the first failure.
    pub fn flush_dirty<F>(&self, mut before_flush: F) -> DbResult<usize>
    where
        F: FnMut(u64) -> DbResult<()>,
    {
        let dirty = self.cache.dirty_entries();
        if let Some(last) = dirty.last() {
            before_flush(last.sequence)?;
        }
        for candidate in &dirty {
            self.write_through(candidate)?;
            self.cache.mark_clean(&candidate.id, candidate.sequence);
        }
        Ok(dirty.len())
    }

    fn write_through(&self, candidate: &EvictionCandidate) -> DbResult<()> {
        match &candidate.state {
            CachedState::Live(doc) => {
                self.segments
                    .flush(&candidate.id, doc.attributes(), candidate.sequence)?;
            }
            CachedState::Deleted => {
                self.segments.remove(&candidate.id, candidate.sequence)?;
            }
        }
        Ok(())
    }

    /// Every live document of `collection` across both tiers, ascending by
    /// id. Scans do not promote into the cache.
    pub fn collection_documents(&self, collection: &Collection) -> DbResult<Vec<Arc<Document>>> {
        let mut merged: BTreeMap<DocumentId, Option<Arc<Document>>> = BTreeMap::new();
        for (id, state) in self.cache.collection_states(collection) {
            merged.insert(id, state.document().cloned());
        }
        for id in self.segments.live_ids(Some(collection)) {
            if merged.contains_key(&id) {
                continue;
            }
            let doc = self
                .segments
                .load(&id)?
                .map(|(attributes, _)| Arc::new(Document::new(id.clone(), attributes)));
            merged.insert(id, doc);
        }
        Ok(merged.into_values().flatten().collect())
    }

    /// Highest sequence known to either tier
    pub fn sequence_of(&self, id: &DocumentId) -> Option<u64> {
        self.cache
            .sequence_of(id)
            .or_else(|| self.segments.sequence_of(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn tiered(dir: &TempDir, budget: u64) -> TieredStore {
        let (segments, _) =
            SegmentStore::open(dir.path(), SegmentOptions::new(1 << 20)).unwrap();
        TieredStore::new(CacheTier::new(budget, budget / 2), segments)
    }

    fn doc(raw: &str, v: serde_json::Value) -> Arc<Document> {
        Arc::new(Document::from_value(DocumentId::parse(raw).unwrap(), v))
    }

    #[test]
    fn test_evicted_document_reads_back_from_segments() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 400);
        for i in 1..=5u64 {
            let raw = format!("USER_{}", i);
            store.apply(
                DocumentId::parse(&raw).unwrap(),
                Some(doc(&raw, json!({"n": i, "pad": "x".repeat(64)}))),
                i,
            );
        }
        let mut synced = Vec::new();
        let report = store.evict(|seq| {
            synced.push(seq);
            Ok(())
        });
        assert!(report.evicted > 0);
        assert!(store.cache().resident_bytes() <= 400);
        assert!(!synced.is_empty());

        let first = DocumentId::parse("USER_1").unwrap();
        assert!(!store.cache().contains(&first));
        let found = store.resolve(&first).unwrap().unwrap();
        assert_eq!(found.get("n"), Some(&json!(1)));
        assert!(store.cache().contains(&first));
    }

    #[test]
    fn test_deleted_entry_hides_segment_copy() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 1 << 20);
        let id = DocumentId::parse("USER_1").unwrap();
        store.segments().flush(&id, doc("USER_1", json!({"v": 1})).attributes(), 1).unwrap();
        store.apply(id.clone(), None, 2);
        assert!(store.resolve(&id).unwrap().is_none());

        store.flush_dirty(|_| Ok(())).unwrap();
        assert!(store.segments().load(&id).unwrap().is_none());
    }

    #[test]
    fn test_collection_documents_merges_tiers() {
        let dir = TempDir::new().unwrap();
        let store = tiered(&dir, 1 << 20);
        let a = DocumentId::parse("USER_a").unwrap();
        let b = DocumentId::parse("USER_b").unwrap();
        store.segments().flush(&b, doc("USER_b", json!({"v": 1})).attributes(), 1).unwrap();
        store.segments().flush(&a, doc("USER_a", json!({"v": 1})).attributes(), 2).unwrap();
        store.apply(b.clone(), Some(doc("USER_b", json!({"v": 2}))), 3);
        store.apply(
            DocumentId::parse("ORDER_1").unwrap(),
            Some(doc("ORDER_1", json!({}))),
            4,
        );

        let users = Collection::new("USER").unwrap();
        let docs = store.collection_documents(&users).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["USER_a", "USER_b"]);
        assert_eq!(docs[1].get("v"), Some(&json!(2)));
    }
}
