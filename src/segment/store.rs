//! Append-only segment store (cold tier)
//!
//! Documents evicted or checkpointed from the cache are appended to the
//! active segment file (`segments/seg-<id>.dat`). Each record carries the
//! WAL sequence of the version it holds; the index keeps the highest
//! sequence per id, so a stale flush never overwrites a newer version.
//!
//! Segment writes are not fsynced individually: every record is also in the
//! WAL until a checkpoint has called `sync()`. A torn tail in the active
//! segment is therefore cut at open.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{fsync_dir, read_frame, FrameRead};
use crate::crypto::PayloadCipher;
use crate::document::{Attributes, Collection, DocumentId};
use crate::fault::{points, FaultInjector};
use crate::observability::Event;
use crate::sync::{lock, read, write};

use super::errors::{SegmentError, SegmentResult};
use super::index::{
    parse_segment_file_name, segment_file_name, RecordLocation, SegmentFile, SegmentIndex,
};
use super::record::SegmentRecord;

/// Settings for opening a segment store
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub max_segment_bytes: u64,
    pub cipher: PayloadCipher,
    pub faults: FaultInjector,
}

impl SegmentOptions {
    pub fn new(max_segment_bytes: u64) -> Self {
        Self {
            max_segment_bytes,
            cipher: PayloadCipher::disabled(),
            faults: FaultInjector::new(),
        }
    }
}

/// What `SegmentStore::open` found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentOpenReport {
    pub files: usize,
    pub records: usize,
    pub truncated_bytes: u64,
}

/// Point-in-time store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SegmentStats {
    pub files: usize,
    pub total_bytes: u64,
    pub live_bytes: u64,
    pub live_documents: usize,
    pub tombstones: usize,
    pub garbage_ratio: f64,
}

pub(super) struct ActiveSegment {
    pub(super) id: u32,
    pub(super) file: File,
    pub(super) len: u64,
    pub(super) unsynced: bool,
    pub(super) next_id: u32,
}

/// The cold tier
pub struct SegmentStore {
    pub(super) dir: PathBuf,
    pub(super) options: SegmentOptions,
    pub(super) index: RwLock<Arc<SegmentIndex>>,
    pub(super) active: Mutex<ActiveSegment>,
    pub(super) compaction: Mutex<()>,
}

impl SegmentStore {
    /// Open the store in `dir`, scanning every segment to rebuild the index
    pub fn open(dir: &Path, options: SegmentOptions) -> SegmentResult<(Self, SegmentOpenReport)> {
        fs::create_dir_all(dir).map_err(|e| {
            SegmentError::io(format!("failed to create {}", dir.display()), e)
        })?;
        remove_temp_files(dir)?;

        let files = list_segment_files(dir)?;
        let mut report = SegmentOpenReport {
            files: files.len(),
            ..Default::default()
        };
        let mut index = SegmentIndex::new();

        let last = files.last().map(|(id, _)| *id);
        let mut tail_len = 0;
        for (id, path) in &files {
            let is_last = Some(*id) == last;
            let (records, valid_len, truncated) = scan_segment(*id, path, is_last, &mut index)?;
            report.records += records;
            report.truncated_bytes += truncated;
            if truncated > 0 {
                warn!(
                    event = Event::SegmentTailTruncated.as_str(),
                    segment = *id,
                    truncated_bytes = truncated,
                    "cut torn segment tail"
                );
            }
            let handle = SegmentFile::open(*id, path)
                .map_err(|e| SegmentError::io(format!("failed to open {}", path.display()), e))?;
            index.add_file(Arc::new(handle), valid_len);
            if is_last {
                tail_len = valid_len;
            }
        }

        let active = match last {
            Some(id) => {
                let path = dir.join(segment_file_name(id));
                let file = open_append(&path)?;
                ActiveSegment {
                    id,
                    file,
                    len: tail_len,
                    unsynced: false,
                    next_id: id + 1,
                }
            }
            None => {
                let (file, handle) = create_segment(dir, 1)?;
                index.add_file(Arc::new(handle), 0);
                ActiveSegment {
                    id: 1,
                    file,
                    len: 0,
                    unsynced: false,
                    next_id: 2,
                }
            }
        };

        info!(
            event = Event::SegmentOpen.as_str(),
            dir = %dir.display(),
            files = report.files,
            records = report.records,
            documents = index.live_documents(),
            "segment store opened"
        );

        let store = Self {
            dir: dir.to_path_buf(),
            options,
            index: RwLock::new(Arc::new(index)),
            active: Mutex::new(active),
            compaction: Mutex::new(()),
        };
        Ok((store, report))
    }

    /// Replace the store's contents with `records`, written to a single
    /// fresh segment. Used to rebuild the cold tier from a snapshot.
    pub fn restore(
        dir: &Path,
        records: impl IntoIterator<Item = SegmentRecord>,
        cipher: &PayloadCipher,
    ) -> SegmentResult<usize> {
        fs::create_dir_all(dir).map_err(|e| {
            SegmentError::io(format!("failed to create {}", dir.display()), e)
        })?;
        remove_temp_files(dir)?;
        for (_, path) in list_segment_files(dir)? {
            fs::remove_file(&path).map_err(|e| {
                SegmentError::io(format!("failed to remove {}", path.display()), e)
            })?;
        }

        let final_path = dir.join(segment_file_name(1));
        let tmp_path = temp_path(&final_path);
        let mut out = File::create(&tmp_path)
            .map_err(|e| SegmentError::io("failed to create restored segment", e))?;
        let mut count = 0;
        for record in records {
            out.write_all(&record.encode(cipher)?)
                .map_err(|e| SegmentError::io("failed to write restored segment", e))?;
            count += 1;
        }
        out.sync_all()
            .map_err(|e| SegmentError::io("failed to fsync restored segment", e))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| SegmentError::io("failed to publish restored segment", e))?;
        fsync_dir(dir).map_err(|e| SegmentError::io("failed to fsync segment directory", e))?;
        Ok(count)
    }

    /// Write `attributes` as version `sequence` of `id`. Returns false if a
    /// version at least as new is already stored.
    pub fn flush(
        &self,
        id: &DocumentId,
        attributes: &Attributes,
        sequence: u64,
    ) -> SegmentResult<bool> {
        self.append_record(SegmentRecord::live(id.clone(), sequence, attributes.clone()))
    }

    /// Record the deletion of `id` at `sequence`. Returns false if nothing
    /// needed to be written.
    pub fn remove(&self, id: &DocumentId, sequence: u64) -> SegmentResult<bool> {
        self.append_record(SegmentRecord::tombstone(id.clone(), sequence))
    }

    fn append_record(&self, record: SegmentRecord) -> SegmentResult<bool> {
        let mut active = lock(&self.active);

        match read(&self.index).get(&record.id) {
            Some(current) if current.sequence >= record.sequence => return Ok(false),
            // A deletion of a document that never reached the cold tier
            None if record.is_tombstone() => return Ok(false),
            _ => {}
        }

        if active.len >= self.options.max_segment_bytes {
            self.rotate_active(&mut active)?;
        }

        let frame = record.encode(&self.options.cipher)?;
        self.options
            .faults
            .check(points::SEGMENT_BEFORE_WRITE)
            .map_err(|e| SegmentError::io("failed to append segment record", e))?;

        let offset = active.len;
        if let Err(e) = active.file.write_all(&frame) {
            let _ = active.file.set_len(offset);
            return Err(SegmentError::io("failed to append segment record", e));
        }
        let frame_len = frame.len() as u64;
        active.len += frame_len;
        active.unsynced = true;

        let mut published = write(&self.index);
        let index = Arc::make_mut(&mut *published);
        index.grow_file(active.id, frame_len);
        index.observe(
            record.id.clone(),
            RecordLocation {
                segment: active.id,
                offset,
                len: frame_len,
                sequence: record.sequence,
                tombstone: record.is_tombstone(),
            },
        );
        debug!(id = %record.id, sequence = record.sequence, segment = active.id, "segment record written");
        Ok(true)
    }

    /// Seal the active segment and continue in a fresh one
    pub(super) fn rotate_active(&self, active: &mut ActiveSegment) -> SegmentResult<()> {
        if active.unsynced {
            active
                .file
                .sync_data()
                .map_err(|e| SegmentError::io("failed to fsync segment", e))?;
        }
        let new_id = active.next_id;
        let (file, handle) = create_segment(&self.dir, new_id)?;
        Arc::make_mut(&mut *write(&self.index)).add_file(Arc::new(handle), 0);

        let sealed = active.id;
        *active = ActiveSegment {
            id: new_id,
            file,
            len: 0,
            unsynced: false,
            next_id: new_id + 1,
        };
        info!(
            event = Event::SegmentRotate.as_str(),
            sealed,
            active = new_id,
            "segment rotated"
        );
        Ok(())
    }

    /// Load the newest version of `id`. `None` if absent or deleted.
    pub fn load(&self, id: &DocumentId) -> SegmentResult<Option<(Attributes, u64)>> {
        let located = read(&self.index).locate(id);
        let Some((loc, file)) = located else {
            return Ok(None);
        };
        if loc.tombstone {
            return Ok(None);
        }
        let record = read_record(&file, &loc, &self.options.cipher)?;
        Ok(record.attributes.map(|a| (a, record.sequence)))
    }

    /// Sequence of the newest stored record for `id`, tombstones included
    pub fn sequence_of(&self, id: &DocumentId) -> Option<u64> {
        read(&self.index).get(id).map(|loc| loc.sequence)
    }

    /// Highest sequence of any stored record
    pub fn max_sequence(&self) -> u64 {
        read(&self.index).max_sequence()
    }

    /// Ids of stored live documents, optionally restricted to a collection
    pub fn live_ids(&self, collection: Option<&Collection>) -> Vec<DocumentId> {
        read(&self.index).live_ids(collection)
    }

    /// Every live document, in id order
    pub fn live_records(&self) -> SegmentResult<Vec<SegmentRecord>> {
        let mut ids = self.live_ids(None);
        ids.sort();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((attributes, sequence)) = self.load(&id)? {
                records.push(SegmentRecord::live(id, sequence, attributes));
            }
        }
        Ok(records)
    }

    /// Read back and verify every live record. Returns the number checked.
    pub fn verify(&self) -> SegmentResult<usize> {
        let ids = self.live_ids(None);
        for id in &ids {
            self.load(id)?;
        }
        Ok(ids.len())
    }

    /// fsync the active segment
    pub fn sync(&self) -> SegmentResult<()> {
        let mut active = lock(&self.active);
        if active.unsynced {
            active
                .file
                .sync_data()
                .map_err(|e| SegmentError::io("failed to fsync segment", e))?;
            active.unsynced = false;
        }
        Ok(())
    }

    pub fn stats(&self) -> SegmentStats {
        let index = read(&self.index);
        SegmentStats {
            files: index.file_ids().len(),
            total_bytes: index.total_bytes(),
            live_bytes: index.live_bytes(),
            live_documents: index.live_documents(),
            tombstones: index.tombstones(),
            garbage_ratio: index.garbage_ratio(),
        }
    }

    /// True when garbage has crossed `ratio` and the store is large enough
    /// to be worth rewriting
    pub fn should_compact(&self, ratio: f64, min_bytes: u64) -> bool {
        let index = read(&self.index);
        index.total_bytes() >= min_bytes && index.garbage_ratio() >= ratio
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Read and decode the record at `loc`
pub(super) fn read_record(
    file: &SegmentFile,
    loc: &RecordLocation,
    cipher: &PayloadCipher,
) -> SegmentResult<SegmentRecord> {
    let body = read_verified_frame(file, loc)?.1;
    SegmentRecord::decode(&body, cipher)
        .map_err(|e| SegmentError::corruption_at(loc.segment, loc.offset, e.message().to_string()))
}

/// Raw frame bytes at `loc` plus its verified body
pub(super) fn read_verified_frame(
    file: &SegmentFile,
    loc: &RecordLocation,
) -> SegmentResult<(Vec<u8>, Vec<u8>)> {
    let bytes = file
        .read_at(loc.offset, loc.len)
        .map_err(|e| SegmentError::io(format!("failed to read {}", file.path().display()), e))?;
    match read_frame(&mut bytes.as_slice(), loc.len) {
        Ok(FrameRead::Frame { body, .. }) => Ok((bytes, body)),
        Ok(FrameRead::Corrupt { reason, .. }) => {
            Err(SegmentError::corruption_at(loc.segment, loc.offset, reason))
        }
        Ok(_) => Err(SegmentError::corruption_at(
            loc.segment,
            loc.offset,
            "record shorter than indexed length",
        )),
        Err(e) => Err(SegmentError::io("failed to decode segment frame", e)),
    }
}

/// Scan one segment into `index`. Returns (records, valid length, bytes
/// truncated from a torn tail).
fn scan_segment(
    id: u32,
    path: &Path,
    is_last: bool,
    index: &mut SegmentIndex,
) -> SegmentResult<(usize, u64, u64)> {
    let file = File::open(path)
        .map_err(|e| SegmentError::io(format!("failed to open {}", path.display()), e))?;
    let file_len = file
        .metadata()
        .map_err(|e| SegmentError::io("failed to stat segment", e))?
        .len();
    let mut reader = BufReader::new(file);

    let mut offset = 0u64;
    let mut records = 0;
    loop {
        let read = read_frame(&mut reader, file_len - offset)
            .map_err(|e| SegmentError::io(format!("failed to read {}", path.display()), e))?;
        match read {
            FrameRead::Eof => break,
            FrameRead::Frame { body, frame_len } => {
                let header = SegmentRecord::decode_header(&body).map_err(|e| {
                    SegmentError::corruption_at(id, offset, e.message().to_string())
                })?;
                index.observe(
                    header.id,
                    RecordLocation {
                        segment: id,
                        offset,
                        len: frame_len,
                        sequence: header.sequence,
                        tombstone: header.tombstone,
                    },
                );
                offset += frame_len;
                records += 1;
            }
            FrameRead::Truncated if is_last => {
                truncate(path, offset)?;
                return Ok((records, offset, file_len - offset));
            }
            FrameRead::Corrupt { frame_len, .. } if is_last && offset + frame_len >= file_len => {
                truncate(path, offset)?;
                return Ok((records, offset, file_len - offset));
            }
            FrameRead::Truncated => {
                return Err(SegmentError::corruption_at(id, offset, "truncated record"))
            }
            FrameRead::Corrupt { reason, .. } => {
                return Err(SegmentError::corruption_at(id, offset, reason))
            }
        }
    }
    Ok((records, offset, 0))
}

fn truncate(path: &Path, len: u64) -> SegmentResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| SegmentError::io("failed to open segment for repair", e))?;
    file.set_len(len)
        .map_err(|e| SegmentError::io("failed to truncate segment tail", e))?;
    file.sync_all()
        .map_err(|e| SegmentError::io("failed to fsync repaired segment", e))
}

pub(super) fn list_segment_files(dir: &Path) -> SegmentResult<Vec<(u32, PathBuf)>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| SegmentError::io(format!("failed to list {}", dir.display()), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SegmentError::io("failed to read segment directory", e))?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_file_name) {
            files.push((id, entry.path()));
        }
    }
    files.sort_by_key(|(id, _)| *id);
    Ok(files)
}

pub(super) fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Leftovers of an interrupted compaction or restore
fn remove_temp_files(dir: &Path) -> SegmentResult<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| SegmentError::io(format!("failed to list {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SegmentError::io("failed to read segment directory", e))?;
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "tmp") {
            debug!(path = %path.display(), "removing interrupted segment output");
            fs::remove_file(&path)
                .map_err(|e| SegmentError::io(format!("failed to remove {}", path.display()), e))?;
        }
    }
    Ok(())
}

fn open_append(path: &Path) -> SegmentResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SegmentError::io(format!("failed to open {}", path.display()), e))
}

/// Create, fsync and open a new empty segment
pub(super) fn create_segment(dir: &Path, id: u32) -> SegmentResult<(File, SegmentFile)> {
    let path = dir.join(segment_file_name(id));
    let file = open_append(&path)?;
    file.sync_all()
        .map_err(|e| SegmentError::io("failed to fsync new segment", e))?;
    fsync_dir(dir).map_err(|e| SegmentError::io("failed to fsync segment directory", e))?;
    let handle = SegmentFile::open(id, &path)
        .map_err(|e| SegmentError::io(format!("failed to open {}", path.display()), e))?;
    Ok((file, handle))
}
