//! Segment compaction
//!
//! Copies the newest live record of every document held by sealed segments
//! into one output segment, builds the next index off-lock, then swaps it in
//! under a brief write lock and unlinks the old files.
//!
//! The output is numbered below the fresh active segment so that, for any
//! document, later file ids always hold newer versions. Old files are
//! deleted in ascending id order: a crash part way through never leaves a
//! superseded version on disk without the tombstone or newer copy that
//! shadows it.

use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::fsync_dir;
use crate::observability::Event;
use crate::document::DocumentId;
use crate::sync::{lock, read, write};

use super::errors::{SegmentError, SegmentResult};
use super::index::{segment_file_name, RecordLocation, SegmentFile, SegmentIndex};
use super::store::{read_verified_frame, temp_path, SegmentStore};

impl SegmentStore {
    /// Rewrite all sealed segments, dropping superseded versions and
    /// deleted documents. Returns the number of bytes freed.
    pub fn compact(&self) -> SegmentResult<u64> {
        let _guard = lock(&self.compaction);

        // Seal the active segment so everything written so far is compactable
        let output_id = {
            let mut active = lock(&self.active);
            let output_id = active.next_id;
            active.next_id = output_id + 1;
            self.rotate_active(&mut active)?;
            output_id
        };

        let snapshot = Arc::clone(&*read(&self.index));
        let (sealed, entries, files, bytes_before) = {
            let index = &snapshot;
            let sealed: Vec<u32> = index
                .file_ids()
                .into_iter()
                .filter(|id| *id < output_id)
                .collect();
            let mut entries = index.entries_in(&sealed);
            let files: Vec<Arc<SegmentFile>> =
                sealed.iter().filter_map(|id| index.file(*id)).collect();
            let bytes_before: u64 = sealed.iter().map(|id| index.file_len(*id)).sum();
            entries.sort_by_key(|(_, loc)| (loc.segment, loc.offset));
            (sealed, entries, files, bytes_before)
        };

        info!(
            event = Event::CompactionStart.as_str(),
            segments = sealed.len(),
            bytes = bytes_before,
            "compaction started"
        );

        let mut moves = Vec::new();
        let mut dropped = Vec::new();
        let mut output = Vec::new();
        for (id, loc) in entries {
            if loc.tombstone {
                dropped.push((id, loc));
                continue;
            }
            let Some(file) = files.iter().find(|f| f.id() == loc.segment) else {
                continue;
            };
            let (frame, _) = read_verified_frame(file, &loc)?;
            let new_loc = RecordLocation {
                segment: output_id,
                offset: output.len() as u64,
                ..loc
            };
            output.extend_from_slice(&frame);
            moves.push((id, loc, new_loc));
        }

        let output_len = output.len() as u64;
        let output_handle = if moves.is_empty() {
            None
        } else {
            Some(self.write_output(output_id, &output)?)
        };

        let output_file = output_handle.map(|handle| (handle, output_len));
        let mut next = (*snapshot).clone();
        apply_compaction(&mut next, output_file.clone(), &moves, &dropped, &sealed);
        {
            let mut published = write(&self.index);
            if Arc::ptr_eq(&*published, &snapshot) {
                *published = Arc::new(next);
            } else {
                // Records were flushed meanwhile; apply the same edits on top
                apply_compaction(
                    Arc::make_mut(&mut *published),
                    output_file,
                    &moves,
                    &dropped,
                    &sealed,
                );
            }
        }
        drop(snapshot);

        for id in &sealed {
            let path = self.dir.join(segment_file_name(*id));
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove compacted segment");
            }
        }
        fsync_dir(&self.dir)
            .map_err(|e| SegmentError::io("failed to fsync segment directory", e))?;

        let freed = bytes_before.saturating_sub(output_len);
        info!(
            event = Event::CompactionComplete.as_str(),
            segments_removed = sealed.len(),
            documents = moves.len(),
            tombstones_dropped = dropped.len(),
            bytes_freed = freed,
            "compaction complete"
        );
        Ok(freed)
    }

    fn write_output(&self, id: u32, bytes: &[u8]) -> SegmentResult<Arc<SegmentFile>> {
        let final_path = self.dir.join(segment_file_name(id));
        let tmp_path = temp_path(&final_path);

        let mut file = File::create(&tmp_path)
            .map_err(|e| SegmentError::io("failed to create compaction output", e))?;
        let written = file.write_all(bytes).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(SegmentError::io("failed to write compaction output", e));
        }
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| SegmentError::io("failed to publish compaction output", e))?;
        fsync_dir(&self.dir)
            .map_err(|e| SegmentError::io("failed to fsync segment directory", e))?;

        let handle = SegmentFile::open(id, &final_path)
            .map_err(|e| SegmentError::io("failed to open compaction output", e))?;
        Ok(Arc::new(handle))
    }
}

/// Point moved documents at the output segment and forget the sealed files.
/// Locations that changed since the compaction read them are left alone.
fn apply_compaction(
    index: &mut SegmentIndex,
    output: Option<(Arc<SegmentFile>, u64)>,
    moves: &[(DocumentId, RecordLocation, RecordLocation)],
    dropped: &[(DocumentId, RecordLocation)],
    sealed: &[u32],
) {
    if let Some((handle, len)) = output {
        index.add_file(handle, len);
    }
    for (id, old, new) in moves {
        index.replace_if(id, old, Some(*new));
    }
    for (id, old) in dropped {
        index.replace_if(id, old, None);
    }
    for id in sealed {
        index.remove_file(*id);
    }
}
