//! Cache entries

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::document::{estimated_size, Document, DocumentId, ENTRY_OVERHEAD_BYTES};

/// What the cache knows about an id
#[derive(Debug, Clone)]
pub enum CachedState {
    Live(Arc<Document>),
    /// Deleted, not yet flushed to the segment store
    Deleted,
}

impl CachedState {
    pub fn document(&self) -> Option<&Arc<Document>> {
        match self {
            CachedState::Live(doc) => Some(doc),
            CachedState::Deleted => None,
        }
    }
}

/// One resident entry. `last_access` is bumped through a shared reference so
/// lookups only need the read lock.
#[derive(Debug)]
pub struct CacheEntry {
    pub(crate) state: CachedState,
    /// WAL sequence of the version held
    pub(crate) sequence: u64,
    pub(crate) dirty: bool,
    pub(crate) size: u64,
    pub(crate) last_access: AtomicU64,
}

impl CacheEntry {
    pub fn new(id: &DocumentId, state: CachedState, sequence: u64, dirty: bool, stamp: u64) -> Self {
        let size = match &state {
            CachedState::Live(doc) => estimated_size(id, doc.attributes()),
            CachedState::Deleted => id.as_str().len() + ENTRY_OVERHEAD_BYTES,
        } as u64;
        Self {
            state,
            sequence,
            dirty,
            size,
            last_access: AtomicU64::new(stamp),
        }
    }

    pub fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> &CachedState {
        &self.state
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// An entry selected for eviction, copied out of the map
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: DocumentId,
    pub state: CachedState,
    pub sequence: u64,
    pub dirty: bool,
    pub last_access: u64,
}
