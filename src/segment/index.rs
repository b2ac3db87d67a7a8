//! In-memory index over segment files
//!
//! Maps each document id to the location of its newest record. Holds the
//! read handles of all live segment files, so a reader that copied a
//! location and its file handle keeps working after compaction has swapped
//! the index and unlinked the file.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::document::{Collection, DocumentId};

const SEGMENT_PREFIX: &str = "seg-";
const SEGMENT_SUFFIX: &str = ".dat";

pub fn segment_file_name(id: u32) -> String {
    format!("{}{:08}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX)
}

pub fn parse_segment_file_name(name: &str) -> Option<u32> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Read handle on one segment file
#[derive(Debug)]
pub struct SegmentFile {
    id: u32,
    path: PathBuf,
    file: Mutex<File>,
}

impl SegmentFile {
    pub fn open(id: u32, path: &Path) -> io::Result<Self> {
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(File::open(path)?),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read `len` bytes at `offset`
    pub fn read_at(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Where the newest record of a document lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub segment: u32,
    pub offset: u64,
    /// Whole frame length, header included
    pub len: u64,
    pub sequence: u64,
    pub tombstone: bool,
}

/// Id → newest record, plus the file handles those records live in.
/// Published behind an `Arc`; writers copy on write while a reader or a
/// compaction still holds the previous version.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    entries: HashMap<DocumentId, RecordLocation>,
    files: BTreeMap<u32, Arc<SegmentFile>>,
    file_bytes: BTreeMap<u32, u64>,
    max_sequence: u64,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DocumentId) -> Option<RecordLocation> {
        self.entries.get(id).copied()
    }

    /// Location plus the handle of its file
    pub fn locate(&self, id: &DocumentId) -> Option<(RecordLocation, Arc<SegmentFile>)> {
        let loc = self.entries.get(id)?;
        let file = self.files.get(&loc.segment)?;
        Some((*loc, Arc::clone(file)))
    }

    /// Record `loc` for `id` if it is newer than what is indexed. Returns
    /// true if the index changed.
    pub fn observe(&mut self, id: DocumentId, loc: RecordLocation) -> bool {
        self.max_sequence = self.max_sequence.max(loc.sequence);
        match self.entries.get(&id) {
            Some(current) if current.sequence >= loc.sequence => false,
            _ => {
                self.entries.insert(id, loc);
                true
            }
        }
    }

    /// Replace `id`'s location only if it still equals `expected`
    pub fn replace_if(
        &mut self,
        id: &DocumentId,
        expected: &RecordLocation,
        new: Option<RecordLocation>,
    ) -> bool {
        match self.entries.get_mut(id) {
            Some(current) if current == expected => {
                match new {
                    Some(loc) => *current = loc,
                    None => {
                        self.entries.remove(id);
                    }
                }
                true
            }
            _ => false,
        }
    }

    pub fn add_file(&mut self, file: Arc<SegmentFile>, len: u64) {
        self.file_bytes.insert(file.id(), len);
        self.files.insert(file.id(), file);
    }

    pub fn remove_file(&mut self, id: u32) -> Option<Arc<SegmentFile>> {
        self.file_bytes.remove(&id);
        self.files.remove(&id)
    }

    pub fn grow_file(&mut self, id: u32, added: u64) {
        *self.file_bytes.entry(id).or_insert(0) += added;
    }

    pub fn file(&self, id: u32) -> Option<Arc<SegmentFile>> {
        self.files.get(&id).cloned()
    }

    pub fn file_ids(&self) -> Vec<u32> {
        self.files.keys().copied().collect()
    }

    pub fn file_len(&self, id: u32) -> u64 {
        self.file_bytes.get(&id).copied().unwrap_or(0)
    }

    pub fn max_sequence(&self) -> u64 {
        self.max_sequence
    }

    /// Entries whose record lives in one of `segments`
    pub fn entries_in(&self, segments: &[u32]) -> Vec<(DocumentId, RecordLocation)> {
        self.entries
            .iter()
            .filter(|(_, loc)| segments.contains(&loc.segment))
            .map(|(id, loc)| (id.clone(), *loc))
            .collect()
    }

    /// Ids of live (non-deleted) documents, optionally restricted to one
    /// collection
    pub fn live_ids(&self, collection: Option<&Collection>) -> Vec<DocumentId> {
        self.entries
            .iter()
            .filter(|(id, loc)| !loc.tombstone && collection.map_or(true, |c| c.contains(id)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn live_documents(&self) -> usize {
        self.entries.values().filter(|l| !l.tombstone).count()
    }

    pub fn tombstones(&self) -> usize {
        self.entries.values().filter(|l| l.tombstone).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.file_bytes.values().sum()
    }

    /// Bytes of records that are still the newest live version of a document
    pub fn live_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|l| !l.tombstone)
            .map(|l| l.len)
            .sum()
    }

    /// Share of segment bytes that compaction would reclaim
    pub fn garbage_ratio(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        1.0 - self.live_bytes() as f64 / total as f64
    }
}
