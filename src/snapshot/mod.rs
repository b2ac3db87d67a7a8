//! Snapshots
//!
//! A snapshot is a point-in-time copy of every live document, taken at a WAL
//! sequence number. Checkpoints write one and then retire the WAL files it
//! covers; recovery restores from the newest valid one when the segment
//! store cannot be opened.
//!
//! # Layout
//!
//! ```text
//! snapshots/
//!   snapshot-00000000000000001042/
//!     state.dat       checksummed frames, one per live document
//!     manifest.json   sequence, document count, state checksum
//! ```
//!
//! Snapshots become visible atomically by directory rename. A directory
//! without a readable manifest is never used.

mod checksum;
mod creator;
mod errors;
mod loader;
mod manifest;

pub use checksum::{compute_file_checksum, format_checksum, parse_checksum};
pub use creator::{parse_snapshot_dir_name, snapshot_dir_name, MANIFEST_FILE, STATE_FILE};
pub use errors::{SnapshotError, SnapshotErrorCode, SnapshotResult};
pub use manifest::{SnapshotManifest, FORMAT_VERSION};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::crypto::PayloadCipher;
use crate::fault::FaultInjector;
use crate::observability::Event;
use crate::segment::SegmentRecord;

/// A published snapshot directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub sequence: u64,
    pub path: PathBuf,
}

/// Creates, lists, loads and prunes snapshots under one directory
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    dir: PathBuf,
    cipher: PayloadCipher,
    faults: FaultInjector,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>, cipher: PayloadCipher, faults: FaultInjector) -> Self {
        Self {
            dir: dir.into(),
            cipher,
            faults,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot of `records` as of `sequence`.
    ///
    /// Every record must carry a sequence ≤ `sequence` and no tombstones are
    /// expected; the caller passes the live set.
    pub fn create<I>(&self, sequence: u64, records: I) -> SnapshotResult<SnapshotInfo>
    where
        I: IntoIterator<Item = SegmentRecord>,
    {
        let (path, manifest) =
            creator::create_snapshot_impl(&self.dir, sequence, records, &self.cipher, &self.faults)?;
        info!(
            event = Event::SnapshotCreated.as_str(),
            sequence,
            documents = manifest.document_count,
            path = %path.display(),
            "snapshot created"
        );
        Ok(SnapshotInfo { sequence, path })
    }

    /// Published snapshots, oldest first. Leftover temporary directories from
    /// an interrupted creation are removed.
    pub fn list(&self) -> SnapshotResult<Vec<SnapshotInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::io_error_at_path(&self.dir, e)),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SnapshotError::io_error_at_path(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if creator::is_temp_dir_name(name) {
                warn!(path = %entry.path().display(), "removing incomplete snapshot");
                fs::remove_dir_all(entry.path())
                    .map_err(|e| SnapshotError::io_error_at_path(&entry.path(), e))?;
                continue;
            }
            if let Some(sequence) = parse_snapshot_dir_name(name) {
                snapshots.push(SnapshotInfo {
                    sequence,
                    path: entry.path(),
                });
            }
        }
        snapshots.sort_by_key(|s| s.sequence);
        Ok(snapshots)
    }

    /// Newest published snapshot, if any
    pub fn latest(&self) -> SnapshotResult<Option<SnapshotInfo>> {
        Ok(self.list()?.pop())
    }

    /// Load and verify one snapshot
    pub fn load(&self, info: &SnapshotInfo) -> SnapshotResult<(SnapshotManifest, Vec<SegmentRecord>)> {
        let (manifest, records) = loader::load_snapshot_impl(&info.path, &self.cipher)?;
        if manifest.sequence != info.sequence {
            return Err(SnapshotError::corruption(format!(
                "manifest sequence {} does not match directory",
                manifest.sequence
            ))
            .with_details(info.path.display().to_string()));
        }
        Ok((manifest, records))
    }

    /// Delete all but the newest `retain` snapshots. Returns how many were
    /// removed.
    pub fn prune(&self, retain: usize) -> SnapshotResult<usize> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(retain);
        for snapshot in &snapshots[..excess] {
            fs::remove_dir_all(&snapshot.path)
                .map_err(|e| SnapshotError::io_error_at_path(&snapshot.path, e))?;
            info!(
                event = Event::SnapshotPruned.as_str(),
                sequence = snapshot.sequence,
                "snapshot pruned"
            );
        }
        Ok(excess)
    }
}
