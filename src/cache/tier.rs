//! LRU cache tier with a byte budget
//!
//! Recency is a logical clock stamped on every access. Eviction orders
//! entries by (last access, sequence) and removes the oldest until the
//! resident size drops to the target. Dirty entries are handed to a flush
//! callback first; an entry whose flush fails stays resident and is retried
//! on the next pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document::{Collection, Document, DocumentId};
use crate::errors::DbResult;
use crate::observability::Event;
use crate::sync::{lock, read, write};

use super::entry::{CacheEntry, CachedState, EvictionCandidate};

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<Document>),
    /// Deleted and not yet flushed: authoritative `NotFound`
    Deleted,
    Miss,
}

/// Counters and sizes reported by `stats()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flush_failures: u64,
    pub resident_bytes: u64,
    pub budget_bytes: u64,
    pub entries: usize,
    pub dirty_entries: usize,
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: usize,
    pub flushed: usize,
    pub flush_failures: usize,
    pub resident_bytes: u64,
}

/// The hot tier
#[derive(Debug)]
pub struct CacheTier {
    entries: RwLock<HashMap<DocumentId, CacheEntry>>,
    clock: AtomicU64,
    resident: AtomicU64,
    budget: u64,
    target: u64,
    evicting: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flush_failures: AtomicU64,
}

impl CacheTier {
    /// `target` is where eviction stops once `budget` has been exceeded
    pub fn new(budget: u64, target: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            resident: AtomicU64::new(0),
            budget,
            target: target.min(budget),
            evicting: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, id: &DocumentId) -> CacheLookup {
        let entries = read(&self.entries);
        match entries.get(id) {
            Some(entry) => {
                entry.touch(self.tick());
                self.hits.fetch_add(1, Ordering::Relaxed);
                match &entry.state {
                    CachedState::Live(doc) => CacheLookup::Hit(Arc::clone(doc)),
                    CachedState::Deleted => CacheLookup::Deleted,
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    /// Sequence of the cached version of `id`, without touching recency
    pub fn sequence_of(&self, id: &DocumentId) -> Option<u64> {
        read(&self.entries).get(id).map(|e| e.sequence)
    }

    /// Insert or replace the entry for `id`
    pub fn put(&self, id: DocumentId, state: CachedState, sequence: u64, dirty: bool) {
        let entry = CacheEntry::new(&id, state, sequence, dirty, self.tick());
        let added = entry.size;
        let mut entries = write(&self.entries);
        if let Some(old) = entries.insert(id, entry) {
            self.resident.fetch_sub(old.size, Ordering::Relaxed);
        }
        self.resident.fetch_add(added, Ordering::Relaxed);
    }

    /// Insert a clean copy loaded from the segment store unless the cache
    /// already holds a version of `id`
    pub fn promote(&self, document: Arc<Document>, sequence: u64) -> bool {
        let id = document.id().clone();
        let entry = CacheEntry::new(&id, CachedState::Live(document), sequence, false, self.tick());
        let added = entry.size;
        let mut entries = write(&self.entries);
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, entry);
        self.resident.fetch_add(added, Ordering::Relaxed);
        true
    }

    /// Drop `id` if it still holds version `sequence`
    pub fn remove_if_unchanged(&self, id: &DocumentId, sequence: u64) -> bool {
        let mut entries = write(&self.entries);
        match entries.get(id) {
            Some(entry) if entry.sequence == sequence => {
                let size = entry.size;
                entries.remove(id);
                self.resident.fetch_sub(size, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Clear the dirty flag of `id` if it still holds version `sequence`
    pub fn mark_clean(&self, id: &DocumentId, sequence: u64) {
        if let Some(entry) = write(&self.entries).get_mut(id) {
            if entry.sequence == sequence {
                entry.dirty = false;
            }
        }
    }

    /// Snapshot of every dirty entry, in sequence order
    pub fn dirty_entries(&self) -> Vec<EvictionCandidate> {
        let entries = read(&self.entries);
        let mut dirty: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(id, e)| candidate(id, e))
            .collect();
        dirty.sort_by_key(|c| c.sequence);
        dirty
    }

    /// Cached ids in the collection, deleted ones included, with their state
    pub fn collection_states(&self, collection: &Collection) -> Vec<(DocumentId, CachedState)> {
        read(&self.entries)
            .iter()
            .filter(|(id, _)| collection.contains(id))
            .map(|(id, e)| (id.clone(), e.state.clone()))
            .collect()
    }

    /// Eviction order: least recently used first, ties broken by smallest
    /// sequence
    pub fn evict_candidates(&self) -> Vec<DocumentId> {
        self.ordered_candidates().into_iter().map(|c| c.id).collect()
    }

    fn ordered_candidates(&self) -> Vec<EvictionCandidate> {
        let entries = read(&self.entries);
        let mut all: Vec<_> = entries.iter().map(|(id, e)| candidate(id, e)).collect();
        all.sort_by_key(|c| (c.last_access, c.sequence));
        all
    }

    pub fn over_budget(&self) -> bool {
        self.resident_bytes() > self.budget
    }

    /// Evict LRU entries until the resident size is at or below the target.
    /// Does nothing while the cache is within budget. `flush` persists a
    /// dirty entry; the entry is dropped only if it succeeds.
    pub fn evict<F>(&self, mut flush: F) -> EvictionReport
    where
        F: FnMut(&EvictionCandidate) -> DbResult<()>,
    {
        let _guard = lock(&self.evicting);
        let mut report = EvictionReport::default();
        if !self.over_budget() {
            report.resident_bytes = self.resident_bytes();
            return report;
        }

        for candidate in self.ordered_candidates() {
            if self.resident_bytes() <= self.target {
                break;
            }
            if candidate.dirty {
                if let Err(e) = flush(&candidate) {
                    report.flush_failures += 1;
                    self.flush_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event = Event::EvictionFlushFailed.as_str(),
                        id = %candidate.id,
                        error = %e,
                        "flush before eviction failed; entry kept"
                    );
                    continue;
                }
                report.flushed += 1;
            }
            if self.remove_if_unchanged(&candidate.id, candidate.sequence) {
                report.evicted += 1;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(id = %candidate.id, "evicted");
            } else if candidate.dirty {
                // Rewritten meanwhile; the flushed version is superseded
                debug!(id = %candidate.id, "entry changed during eviction");
            }
        }

        report.resident_bytes = self.resident_bytes();
        info!(
            event = Event::EvictionComplete.as_str(),
            evicted = report.evicted,
            flushed = report.flushed,
            flush_failures = report.flush_failures,
            resident_bytes = report.resident_bytes,
            "eviction pass complete"
        );
        report
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident.load(Ordering::Relaxed)
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        read(&self.entries).contains_key(id)
    }

    pub fn stats(&self) -> CacheStats {
        let entries = read(&self.entries);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            resident_bytes: self.resident_bytes(),
            budget_bytes: self.budget,
            entries: entries.len(),
            dirty_entries: entries.values().filter(|e| e.dirty).count(),
        }
    }
}

fn candidate(id: &DocumentId, entry: &CacheEntry) -> EvictionCandidate {
    EvictionCandidate {
        id: id.clone(),
        state: entry.state.clone(),
        sequence: entry.sequence,
        dirty: entry.dirty,
        last_access: entry.last_access(),
    }
}
