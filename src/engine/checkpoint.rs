//! Checkpoint
//!
//! 1. Pause writers and take the cut `S` = last WAL sequence; fsync the WAL
//! 2. Resume writers, then flush every dirty cache entry to the segments
//! 3. Write a snapshot of the segment store labeled `S`
//! 4. Prune snapshots beyond the retention count
//! 5. Retire WAL files covered by the oldest retained snapshot
//!
//! Any failure aborts the checkpoint and leaves the WAL intact. Writers that
//! commit during steps 2-3 are ≥ `S + 1` and may already be in the snapshot;
//! replay skips a version the segments hold, so that is harmless.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::errors::{DbError, DbResult};
use crate::observability::Event;
use crate::sync::{lock, write};

use super::Inner;

/// Outcome of a successful checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointReport {
    /// Every entry ≤ this sequence is in the snapshot
    pub sequence: u64,
    pub snapshot_path: PathBuf,
    pub flushed_entries: usize,
    pub snapshots_pruned: usize,
    pub wal_files_retired: usize,
    pub duration_ms: u64,
}

impl Inner {
    pub(super) fn checkpoint(&self) -> DbResult<CheckpointReport> {
        let _exclusive = lock(&self.checkpointing);
        let started = Instant::now();
        info!(event = Event::CheckpointStart.as_str(), "checkpoint started");

        match self.run_checkpoint(started) {
            Ok(report) => {
                self.metrics.increment_checkpoints();
                info!(
                    event = Event::CheckpointComplete.as_str(),
                    sequence = report.sequence,
                    flushed = report.flushed_entries,
                    retired = report.wal_files_retired,
                    duration_ms = report.duration_ms,
                    "checkpoint complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.metrics.increment_checkpoint_failures();
                error!(event = Event::CheckpointFailed.as_str(), error = %e, "checkpoint failed");
                Err(e)
            }
        }
    }

    fn run_checkpoint(&self, started: Instant) -> DbResult<CheckpointReport> {
        let (sequence, since) = {
            let _gate = write(&self.commit_gate);
            let mut wal = lock(&self.wal);
            wal.sync()?;
            (
                wal.last_sequence(),
                self.since_checkpoint.swap(0, Ordering::Relaxed),
            )
        };

        let flushed = match self.flush_for_checkpoint() {
            Ok(flushed) => flushed,
            Err(e) => {
                self.since_checkpoint.fetch_add(since, Ordering::Relaxed);
                return Err(e);
            }
        };

        let snapshot = self
            .store
            .segments()
            .live_records()
            .map_err(DbError::from)
            .and_then(|records| {
                self.snapshots
                    .create(sequence, records)
                    .map_err(DbError::from)
            });
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.since_checkpoint.fetch_add(since, Ordering::Relaxed);
                return Err(e);
            }
        };

        let pruned = self.snapshots.prune(self.config.snapshot.retain)?;
        let oldest = self
            .snapshots
            .list()?
            .first()
            .map(|info| info.sequence)
            .unwrap_or(sequence);
        let retired = lock(&self.wal).retire_through(oldest)?;

        Ok(CheckpointReport {
            sequence,
            snapshot_path: snapshot.path,
            flushed_entries: flushed,
            snapshots_pruned: pruned,
            wal_files_retired: retired,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn flush_for_checkpoint(&self) -> DbResult<usize> {
        let flushed = self.store.flush_dirty(|seq| self.sync_wal_through(seq))?;
        self.metrics.add_segment_flushes(flushed as u64);
        self.store.segments().sync()?;
        Ok(flushed)
    }
}
