//! Startup sequence
//!
//! # Order
//!
//! 1. Note and remove the clean-shutdown marker
//! 2. Open the segment store; on an integrity failure rebuild it from the
//!    newest snapshot that verifies, falling back to older ones. With no
//!    usable snapshot and a WAL that still starts at sequence 1, discard
//!    the segments and rebuild everything from the WAL.
//! 3. Open the WAL, cutting a torn tail
//! 4. Replay entries after the base sequence into the cache as dirty
//!    entries, skipping versions the segment store already holds
//! 5. Next sequence = max(last WAL entry, base, segment max) + 1
//!
//! The WAL wins over the segment store up to its last verified entry.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::{CacheTier, TieredStore};
use crate::codec::fsync_dir;
use crate::config::EngineConfig;
use crate::crypto::PayloadCipher;
use crate::errors::{DbError, DbResult};
use crate::fault::FaultInjector;
use crate::observability::Event;
use crate::segment::{SegmentOptions, SegmentStore};
use crate::snapshot::SnapshotManager;
use crate::wal::{list_wal_files, WalOptions, WalWriter};

use super::replay::{ReplayStats, WalReplayer};

/// Clean shutdown marker filename
pub const CLEAN_SHUTDOWN_MARKER: &str = "clean_shutdown";

/// What recovery found and did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// The previous run ended with `shutdown()`
    pub was_clean_shutdown: bool,
    /// Sequence replay started after
    pub base_sequence: u64,
    /// Snapshot the segment store was rebuilt from, if any
    pub restored_from_snapshot: Option<u64>,
    /// Segments were discarded and every document rebuilt from the WAL
    pub rebuilt_from_wal: bool,
    pub segment_files: usize,
    pub segment_truncated_bytes: u64,
    pub wal_truncated_bytes: u64,
    pub wal_discarded_entries: usize,
    pub replayed_entries: u64,
    pub skipped_entries: u64,
    pub next_sequence: u64,
}

/// Components rebuilt by recovery
pub struct Recovered {
    pub store: TieredStore,
    pub wal: WalWriter,
    pub report: RecoveryReport,
}

/// Orchestrates startup for one data directory
pub struct RecoveryManager {
    data_dir: PathBuf,
}

impl RecoveryManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.data_dir.join(CLEAN_SHUTDOWN_MARKER)
    }

    /// Check if the clean shutdown marker exists
    pub fn was_clean_shutdown(&self) -> bool {
        self.marker_path().exists()
    }

    /// Write the clean shutdown marker (graceful shutdown only)
    pub fn mark_clean_shutdown(&self) -> DbResult<()> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| DbError::io("failed to create data directory", e))?;
        fs::write(self.marker_path(), b"")
            .map_err(|e| DbError::io("failed to write shutdown marker", e))?;
        fsync_dir(&self.data_dir).map_err(|e| DbError::io("failed to fsync data directory", e))
    }

    fn remove_shutdown_marker(&self) -> DbResult<()> {
        let path = self.marker_path();
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| DbError::io("failed to remove shutdown marker", e))?;
            fsync_dir(&self.data_dir)
                .map_err(|e| DbError::io("failed to fsync data directory", e))?;
        }
        Ok(())
    }

    /// Run the startup sequence
    pub fn recover(
        &self,
        config: &EngineConfig,
        cipher: &PayloadCipher,
        faults: &FaultInjector,
    ) -> DbResult<Recovered> {
        info!(
            event = Event::RecoveryStart.as_str(),
            data_dir = %self.data_dir.display(),
            "recovery started"
        );
        match self.run(config, cipher, faults) {
            Ok(recovered) => Ok(recovered),
            Err(e) => {
                error!(event = Event::RecoveryFailed.as_str(), error = %e, "recovery failed");
                Err(e)
            }
        }
    }

    fn run(
        &self,
        config: &EngineConfig,
        cipher: &PayloadCipher,
        faults: &FaultInjector,
    ) -> DbResult<Recovered> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| DbError::io("failed to create data directory", e))?;

        let mut report = RecoveryReport {
            was_clean_shutdown: self.was_clean_shutdown(),
            ..Default::default()
        };
        self.remove_shutdown_marker()?;

        let snapshots = SnapshotManager::new(config.snapshots_dir(), cipher.clone(), faults.clone());
        let segment_options = SegmentOptions {
            max_segment_bytes: config.segment.max_segment_bytes,
            cipher: cipher.clone(),
            faults: faults.clone(),
        };

        let newest = snapshots.latest()?.map(|s| s.sequence).unwrap_or(0);
        let (segments, segment_report, base) =
            match SegmentStore::open(&config.segments_dir(), segment_options.clone()) {
                Ok((segments, seg_report)) => (segments, seg_report, newest),
                Err(e) if e.is_corruption() => {
                    warn!(error = %e, "segment store damaged; restoring from snapshot");
                    let base = match restore_from_snapshots(&snapshots, &config.segments_dir(), cipher) {
                        Ok(restored) => {
                            report.restored_from_snapshot = Some(restored);
                            restored
                        }
                        Err(restore_err) => {
                            if !wal_holds_full_history(&config.wal_dir())? {
                                return Err(restore_err);
                            }
                            warn!(
                                event = Event::RecoveryWalRebuild.as_str(),
                                error = %restore_err,
                                "no usable snapshot; rebuilding segment store from the WAL"
                            );
                            SegmentStore::restore(&config.segments_dir(), Vec::new(), cipher)?;
                            report.rebuilt_from_wal = true;
                            0
                        }
                    };
                    let (segments, seg_report) =
                        SegmentStore::open(&config.segments_dir(), segment_options)?;
                    (segments, seg_report, base)
                }
                Err(e) => return Err(e.into()),
            };
        report.base_sequence = base;
        report.segment_files = segment_report.files;
        report.segment_truncated_bytes = segment_report.truncated_bytes;

        let wal_options = WalOptions {
            policy: config.wal.durability,
            max_segment_bytes: config.wal.max_segment_bytes,
            cipher: cipher.clone(),
            faults: faults.clone(),
            min_next_sequence: base.max(segments.max_sequence()) + 1,
        };
        let (wal, wal_report) = WalWriter::open(&config.wal_dir(), wal_options)?;
        report.wal_truncated_bytes = wal_report.truncated_bytes;
        report.wal_discarded_entries = wal_report.discarded_entries;

        let cache = CacheTier::new(config.cache.budget_bytes(), config.cache.target_bytes());
        let mut store = TieredStore::new(cache, segments);

        info!(
            event = Event::RecoveryReplayBegin.as_str(),
            from_sequence = base + 1,
            "WAL replay started"
        );
        let stats: ReplayStats = WalReplayer::replay(wal.reader().replay(base + 1)?, &mut store)?;
        report.replayed_entries = stats.applied;
        report.skipped_entries = stats.skipped;
        report.next_sequence = wal
            .last_sequence()
            .max(base)
            .max(store.segments().max_sequence())
            + 1;

        info!(
            event = Event::RecoveryReplayComplete.as_str(),
            applied = stats.applied,
            skipped = stats.skipped,
            next_sequence = report.next_sequence,
            clean_shutdown = report.was_clean_shutdown,
            "WAL replay complete"
        );

        Ok(Recovered { store, wal, report })
    }
}

/// True when the WAL still starts at sequence 1, so replaying it alone
/// reproduces every document the segment store could hold
fn wal_holds_full_history(wal_dir: &Path) -> DbResult<bool> {
    Ok(list_wal_files(wal_dir)?
        .first()
        .map_or(false, |file| file.first_sequence <= 1))
}

/// Rebuild the segment directory from the newest snapshot that verifies.
/// Returns its sequence.
fn restore_from_snapshots(
    snapshots: &SnapshotManager,
    segments_dir: &Path,
    cipher: &PayloadCipher,
) -> DbResult<u64> {
    let mut last_error = None;
    for info in snapshots.list()?.into_iter().rev() {
        match snapshots.load(&info) {
            Ok((manifest, records)) => {
                let count = SegmentStore::restore(segments_dir, records, cipher)?;
                warn!(
                    event = Event::RecoverySnapshotRestore.as_str(),
                    sequence = manifest.sequence,
                    documents = count,
                    "segment store rebuilt from snapshot"
                );
                return Ok(manifest.sequence);
            }
            Err(e) => {
                warn!(path = %info.path.display(), error = %e, "snapshot unusable");
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => DbError::IntegrityFailure(
            "segment store is damaged and no snapshot is available".into(),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use crate::wal::PendingEntry;
    use serde_json::json;
    use tempfile::TempDir;

    fn recover(config: &EngineConfig) -> Recovered {
        RecoveryManager::new(&config.data_dir)
            .recover(config, &PayloadCipher::disabled(), &FaultInjector::new())
            .unwrap()
    }

    #[test]
    fn test_fresh_directory() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::new(temp.path());
        let recovered = recover(&config);
        assert_eq!(recovered.report.next_sequence, 1);
        assert!(!recovered.report.was_clean_shutdown);
        assert_eq!(recovered.report.restored_from_snapshot, None);
    }

    #[test]
    fn test_marker_is_consumed() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::new(temp.path());
        let manager = RecoveryManager::new(temp.path());
        manager.mark_clean_shutdown().unwrap();

        let recovered = recover(&config);
        assert!(recovered.report.was_clean_shutdown);
        assert!(!manager.was_clean_shutdown());
    }

    #[test]
    fn test_wal_entries_replayed_into_cache() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::new(temp.path());
        {
            let mut recovered = recover(&config);
            let id = DocumentId::parse("USER_1").unwrap();
            let attrs = json!({"name": "Alice"}).as_object().cloned().unwrap();
            recovered.wal.append(PendingEntry::create(id, attrs)).unwrap();
        }

        let recovered = recover(&config);
        assert_eq!(recovered.report.replayed_entries, 1);
        assert_eq!(recovered.report.next_sequence, 2);
        let doc = recovered
            .store
            .resolve(&DocumentId::parse("USER_1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("name"), Some(&json!("Alice")));
        assert_eq!(recovered.store.cache().stats().dirty_entries, 1);
    }
}
