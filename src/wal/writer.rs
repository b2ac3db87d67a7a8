//! WAL writer
//!
//! - Every append or batch reaches the file in a single `write`
//! - A failed write or fsync truncates the file back to its pre-batch
//!   length; sequence numbers of a failed batch are not consumed
//! - fsync timing follows the `DurabilityPolicy`
//! - The active file rotates once it exceeds `max_segment_bytes`. A batch
//!   never spans two files.
//! - On open, a torn tail in the last file is cut off, together with any
//!   incomplete trailing transaction batch

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::fsync_dir;
use crate::config::DurabilityPolicy;
use crate::crypto::PayloadCipher;
use crate::fault::{points, FaultInjector};
use crate::observability::Event;

use super::batching::{SyncTracker, WalBatch};
use super::errors::{WalError, WalResult};
use super::reader::{list_wal_files, wal_file_name, FrameStep, WalFile, WalFileReader, WalReader};
use super::record::{PendingEntry, WalEntry};

/// Settings for opening a WAL
#[derive(Debug, Clone)]
pub struct WalOptions {
    pub policy: DurabilityPolicy,
    pub max_segment_bytes: u64,
    pub cipher: PayloadCipher,
    pub faults: FaultInjector,
    /// First sequence number to hand out if the log holds no entries
    pub min_next_sequence: u64,
}

impl WalOptions {
    pub fn new(policy: DurabilityPolicy, max_segment_bytes: u64) -> Self {
        Self {
            policy,
            max_segment_bytes,
            cipher: PayloadCipher::disabled(),
            faults: FaultInjector::new(),
            min_next_sequence: 1,
        }
    }
}

/// What `WalWriter::open` found and repaired
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalOpenReport {
    /// Sequence number of the last intact entry (0 if none)
    pub last_sequence: u64,
    /// Bytes cut from the tail of the last file
    pub truncated_bytes: u64,
    /// Entries of an incomplete trailing batch that were cut
    pub discarded_entries: usize,
    pub file_count: usize,
}

struct ActiveFile {
    path: PathBuf,
    file: File,
    first_sequence: u64,
    len: u64,
}

#[derive(Debug, Clone)]
struct SealedFile {
    path: PathBuf,
    last_sequence: u64,
    len: u64,
}

/// Appends entries to the active WAL file
pub struct WalWriter {
    wal_dir: PathBuf,
    active: ActiveFile,
    sealed: Vec<SealedFile>,
    next_sequence: u64,
    durable_sequence: u64,
    tracker: SyncTracker,
    max_segment_bytes: u64,
    cipher: PayloadCipher,
    faults: FaultInjector,
}

/// Scan result of one file
struct ScannedFile {
    entries: u64,
    last_sequence: Option<u64>,
    valid_len: u64,
    discarded_entries: usize,
}

/// Tracks the open transaction batch while scanning the last file
struct OpenBatch {
    start_offset: u64,
    txn_id: Option<u64>,
    expected: u32,
    seen: u32,
    first_sequence: u64,
}

impl WalWriter {
    /// Open (or create) the WAL in `wal_dir`, repairing a torn tail
    pub fn open(wal_dir: &Path, options: WalOptions) -> WalResult<(Self, WalOpenReport)> {
        fs::create_dir_all(wal_dir).map_err(|e| {
            WalError::append_failed(
                format!("failed to create WAL directory {}", wal_dir.display()),
                e,
            )
        })?;

        let files = list_wal_files(wal_dir)?;
        let mut report = WalOpenReport {
            file_count: files.len(),
            ..Default::default()
        };

        let mut sealed = Vec::new();
        let mut last_sequence: Option<u64> = None;

        let last_index = files.len().checked_sub(1);
        let mut tail: Option<(WalFile, u64)> = None;

        for (i, file) in files.iter().enumerate() {
            let is_last = Some(i) == last_index;
            let scanned = Self::scan_file(file, is_last, last_sequence, &options.cipher)?;

            if is_last {
                report.truncated_bytes = scanned.truncated_from(file)?;
                report.discarded_entries = scanned.discarded_entries;
                if scanned.valid_len < file_len(&file.path)? {
                    truncate_file(&file.path, scanned.valid_len)?;
                }
                tail = Some((file.clone(), scanned.valid_len));
            } else if let Some(last) = scanned.last_sequence {
                sealed.push(SealedFile {
                    path: file.path.clone(),
                    last_sequence: last,
                    len: scanned.valid_len,
                });
            } else {
                // An empty sealed file only appears if a crash interrupted
                // retirement or rotation
                debug!(path = %file.path.display(), "removing empty sealed WAL file");
                remove_file(&file.path)?;
            }

            if scanned.last_sequence.is_some() {
                last_sequence = scanned.last_sequence;
            }
        }

        report.last_sequence = last_sequence.unwrap_or(0);

        let next_sequence = match last_sequence {
            Some(last) => {
                if last + 1 < options.min_next_sequence {
                    return Err(WalError::corruption(format!(
                        "WAL ends at sequence {} but persisted state is at {}",
                        last,
                        options.min_next_sequence - 1
                    )));
                }
                last + 1
            }
            None => {
                let named = tail.as_ref().map(|(f, _)| f.first_sequence).unwrap_or(1);
                options.min_next_sequence.max(named).max(1)
            }
        };

        let active = match tail {
            Some((file, len)) if len > 0 || file.first_sequence == next_sequence => {
                ActiveFile {
                    file: open_append(&file.path)?,
                    path: file.path,
                    first_sequence: file.first_sequence,
                    len,
                }
            }
            Some((file, _)) => {
                // Empty tail named for a sequence we will not use
                remove_file(&file.path)?;
                create_active(wal_dir, next_sequence)?
            }
            None => create_active(wal_dir, next_sequence)?,
        };

        if report.truncated_bytes > 0 || report.discarded_entries > 0 {
            warn!(
                event = Event::WalTailTruncated.as_str(),
                path = %active.path.display(),
                truncated_bytes = report.truncated_bytes,
                discarded_entries = report.discarded_entries,
                "cut torn WAL tail"
            );
        }

        info!(
            event = Event::WalOpen.as_str(),
            dir = %wal_dir.display(),
            files = sealed.len() + 1,
            next_sequence,
            "WAL opened"
        );

        let writer = Self {
            wal_dir: wal_dir.to_path_buf(),
            active,
            sealed,
            next_sequence,
            durable_sequence: next_sequence - 1,
            tracker: SyncTracker::new(options.policy),
            max_segment_bytes: options.max_segment_bytes,
            cipher: options.cipher,
            faults: options.faults,
        };
        Ok((writer, report))
    }

    fn scan_file(
        file: &WalFile,
        is_last: bool,
        previous: Option<u64>,
        cipher: &PayloadCipher,
    ) -> WalResult<ScannedFile> {
        let mut reader = WalFileReader::open(&file.path, cipher.clone())?;
        let label = file.path.display().to_string();

        let mut scanned = ScannedFile {
            entries: 0,
            last_sequence: None,
            valid_len: 0,
            discarded_entries: 0,
        };
        let mut expected = previous.map(|p| p + 1);
        let mut batch: Option<OpenBatch> = None;

        loop {
            match reader.next_frame()? {
                FrameStep::End => break,
                FrameStep::Damaged {
                    offset,
                    reason,
                    at_tail,
                } => {
                    if is_last && at_tail {
                        warn!(path = %label, offset, %reason, "damaged frame at WAL tail");
                        break;
                    }
                    return Err(WalError::corruption_at_offset(&label, offset, reason));
                }
                FrameStep::Entry { entry, offset } => {
                    if scanned.entries == 0 && entry.sequence != file.first_sequence {
                        return Err(WalError::corruption_at_sequence(
                            entry.sequence,
                            format!("first entry of {} does not match file name", label),
                        ));
                    }
                    if let Some(exp) = expected {
                        if entry.sequence != exp {
                            return Err(WalError::corruption_at_sequence(
                                entry.sequence,
                                format!("non-sequential entry: expected {}", exp),
                            ));
                        }
                    }
                    expected = Some(entry.sequence + 1);

                    Self::track_batch(&mut batch, &entry, offset)?;

                    scanned.entries += 1;
                    scanned.valid_len = reader.offset();
                    scanned.last_sequence = Some(entry.sequence);
                }
            }
        }

        if let Some(open) = batch {
            if !is_last {
                return Err(WalError::corruption_at_sequence(
                    open.first_sequence,
                    format!("incomplete transaction batch in sealed file {}", label),
                ));
            }
            scanned.discarded_entries = open.seen as usize;
            scanned.valid_len = open.start_offset;
            scanned.last_sequence = if open.first_sequence > file.first_sequence {
                Some(open.first_sequence - 1)
            } else {
                None
            };
        }

        Ok(scanned)
    }

    fn track_batch(batch: &mut Option<OpenBatch>, entry: &WalEntry, offset: u64) -> WalResult<()> {
        match batch {
            Some(open) => {
                if open.txn_id != entry.txn_id || open.expected != entry.batch_len {
                    return Err(WalError::corruption_at_sequence(
                        entry.sequence,
                        "entry interleaved inside another transaction's batch",
                    ));
                }
                open.seen += 1;
            }
            None => {
                *batch = Some(OpenBatch {
                    start_offset: offset,
                    txn_id: entry.txn_id,
                    expected: entry.batch_len,
                    seen: 1,
                    first_sequence: entry.sequence,
                });
            }
        }
        if let Some(open) = batch {
            if open.seen == open.expected {
                *batch = None;
            }
        }
        Ok(())
    }

    /// Append a single entry outside any transaction
    pub fn append(&mut self, entry: PendingEntry) -> WalResult<u64> {
        let seqs = self.append_batch(None, vec![entry])?;
        seqs.into_iter()
            .next()
            .ok_or_else(|| WalError::corruption("empty append result"))
    }

    /// Append all `entries` as one batch with consecutive sequence numbers
    pub fn append_batch(
        &mut self,
        txn_id: Option<u64>,
        entries: Vec<PendingEntry>,
    ) -> WalResult<Vec<u64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        if self.active.len >= self.max_segment_bytes {
            self.rotate()?;
        }

        let count = entries.len();
        let batch_len = count as u32;
        let mut batch = WalBatch::new();
        let mut sequence = self.next_sequence;
        for pending in entries {
            let entry = WalEntry {
                sequence,
                txn_id,
                batch_len,
                kind: pending.kind,
                target: pending.target,
                payload: pending.payload,
            };
            batch.add_frame(&entry.encode(&self.cipher)?, sequence);
            sequence += 1;
        }

        self.faults
            .check(points::WAL_BEFORE_WRITE)
            .map_err(|e| WalError::append_failed("failed to write WAL batch", e))?;

        let pre_len = self.active.len;
        if let Err(e) = self.active.file.write_all(batch.buffer()) {
            self.truncate_active(pre_len);
            return Err(WalError::append_failed("failed to write WAL batch", e));
        }
        self.active.len += batch.len_bytes();
        self.tracker.record_written(count);

        if self.tracker.must_sync_now() {
            if let Err(e) = self.fsync_active() {
                self.truncate_active(pre_len);
                self.tracker.record_discarded(count);
                return Err(e);
            }
            self.durable_sequence = sequence - 1;
            self.tracker.record_synced();
        }

        self.next_sequence = sequence;
        Ok(batch.into_sequence_numbers())
    }

    fn fsync_active(&mut self) -> WalResult<()> {
        self.faults
            .check(points::WAL_BEFORE_FSYNC)
            .map_err(|e| WalError::fsync_failed("failed to fsync WAL", e))?;
        self.active
            .file
            .sync_data()
            .map_err(|e| WalError::fsync_failed("failed to fsync WAL", e))
    }

    fn truncate_active(&mut self, len: u64) {
        match self.active.file.set_len(len) {
            Ok(()) => self.active.len = len,
            Err(e) => {
                // Leftover bytes fail their checksum or form an incomplete
                // batch, both of which are cut at the next open
                warn!(
                    path = %self.active.path.display(),
                    error = %e,
                    "failed to truncate WAL after failed append"
                );
            }
        }
    }

    /// fsync all written entries
    pub fn sync(&mut self) -> WalResult<()> {
        if self.tracker.pending_entries() == 0 {
            return Ok(());
        }
        self.fsync_active()?;
        self.durable_sequence = self.next_sequence - 1;
        self.tracker.record_synced();
        Ok(())
    }

    /// Ensure every entry up to `sequence` is durable
    pub fn sync_through(&mut self, sequence: u64) -> WalResult<()> {
        if sequence > self.durable_sequence {
            self.sync()?;
        }
        Ok(())
    }

    /// fsync if the batched policy's interval has passed. Returns true if a
    /// sync happened.
    pub fn sync_if_due(&mut self) -> WalResult<bool> {
        if self.tracker.deadline_passed() {
            self.sync()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Seal the active file and switch to a fresh one named by the next
    /// sequence number. The new file and the directory entry are durable
    /// before any entry is written to it.
    pub fn rotate(&mut self) -> WalResult<()> {
        if self.next_sequence == self.active.first_sequence {
            return Ok(());
        }
        self.sync()?;

        let new_active = create_active(&self.wal_dir, self.next_sequence)?;
        let old = std::mem::replace(&mut self.active, new_active);
        self.sealed.push(SealedFile {
            path: old.path,
            last_sequence: self.next_sequence - 1,
            len: old.len,
        });

        info!(
            event = Event::WalRotate.as_str(),
            sealed_through = self.next_sequence - 1,
            active = %self.active.path.display(),
            "WAL rotated"
        );
        Ok(())
    }

    /// Delete sealed files whose entries are all ≤ `sequence`. The active
    /// file is sealed first when it is fully covered. Returns the number of
    /// files removed.
    pub fn retire_through(&mut self, sequence: u64) -> WalResult<usize> {
        if self.next_sequence > self.active.first_sequence && self.next_sequence - 1 <= sequence {
            self.rotate()?;
        }

        let (retire, keep): (Vec<SealedFile>, Vec<SealedFile>) = self
            .sealed
            .drain(..)
            .partition(|f| f.last_sequence <= sequence);
        self.sealed = keep;

        for file in &retire {
            remove_file(&file.path)?;
        }
        if !retire.is_empty() {
            fsync_dir(&self.wal_dir)
                .map_err(|e| WalError::append_failed("failed to fsync WAL directory", e))?;
            info!(
                event = Event::WalRetire.as_str(),
                through = sequence,
                files = retire.len(),
                "retired WAL files"
            );
        }
        Ok(retire.len())
    }

    /// Reader over this WAL's directory
    pub fn reader(&self) -> WalReader {
        WalReader::new(&self.wal_dir, self.cipher.clone())
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Last assigned sequence number, 0 if none
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn durable_sequence(&self) -> u64 {
        self.durable_sequence
    }

    pub fn pending_entries(&self) -> usize {
        self.tracker.pending_entries()
    }

    pub fn file_count(&self) -> usize {
        self.sealed.len() + 1
    }

    pub fn total_bytes(&self) -> u64 {
        self.sealed.iter().map(|f| f.len).sum::<u64>() + self.active.len
    }
}

impl ScannedFile {
    fn truncated_from(&self, file: &WalFile) -> WalResult<u64> {
        Ok(file_len(&file.path)?.saturating_sub(self.valid_len))
    }
}

fn file_len(path: &Path) -> WalResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| WalError::append_failed(format!("failed to stat {}", path.display()), e))
}

fn truncate_file(path: &Path, len: u64) -> WalResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| WalError::append_failed("failed to open WAL for repair", e))?;
    file.set_len(len)
        .map_err(|e| WalError::append_failed("failed to truncate WAL tail", e))?;
    file.sync_all()
        .map_err(|e| WalError::fsync_failed("failed to fsync repaired WAL", e))
}

fn remove_file(path: &Path) -> WalResult<()> {
    fs::remove_file(path).map_err(|e| {
        WalError::append_failed(format!("failed to remove {}", path.display()), e)
    })
}

fn open_append(path: &Path) -> WalResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WalError::append_failed(format!("failed to open {}", path.display()), e))
}

fn create_active(wal_dir: &Path, first_sequence: u64) -> WalResult<ActiveFile> {
    let path = wal_dir.join(wal_file_name(first_sequence));
    let file = open_append(&path)?;
    file.sync_all()
        .map_err(|e| WalError::fsync_failed("failed to fsync new WAL file", e))?;
    fsync_dir(wal_dir).map_err(|e| WalError::fsync_failed("failed to fsync WAL directory", e))?;
    Ok(ActiveFile {
        path,
        file,
        first_sequence,
        len: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use serde_json::json;
    use tempfile::TempDir;

    fn create(id: &str, name: &str) -> PendingEntry {
        PendingEntry::create(
            DocumentId::parse(id).unwrap(),
            json!({ "name": name }).as_object().cloned().unwrap(),
        )
    }

    fn open(dir: &Path) -> WalWriter {
        let (writer, _) =
            WalWriter::open(dir, WalOptions::new(DurabilityPolicy::Immediate, 1 << 20)).unwrap();
        writer
    }

    #[test]
    fn test_sequences_start_at_one_and_continue_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut wal = open(dir.path());
            assert_eq!(wal.append(create("USER_1", "Alice")).unwrap(), 1);
            assert_eq!(wal.append(create("USER_2", "Bob")).unwrap(), 2);
        }
        let mut wal = open(dir.path());
        assert_eq!(wal.next_sequence(), 3);
        assert_eq!(wal.append(create("USER_3", "Carol")).unwrap(), 3);
    }

    #[test]
    fn test_batch_gets_consecutive_sequences() {
        let dir = TempDir::new().unwrap();
        let mut wal = open(dir.path());
        let seqs = wal
            .append_batch(Some(9), vec![create("ORDER_1", "o"), create("PAYMENT_1", "p")])
            .unwrap();
        assert_eq!(seqs, vec![1, 2]);

        let entries = wal.reader().read_all().unwrap();
        assert!(entries.iter().all(|e| e.txn_id == Some(9) && e.batch_len == 2));
    }

    #[test]
    fn test_failed_write_consumes_no_sequence() {
        let dir = TempDir::new().unwrap();
        let faults = FaultInjector::new();
        let mut options = WalOptions::new(DurabilityPolicy::Immediate, 1 << 20);
        options.faults = faults.clone();
        let (mut wal, _) = WalWriter::open(dir.path(), options).unwrap();

        wal.append(create("USER_1", "Alice")).unwrap();
        faults.arm(points::WAL_BEFORE_FSYNC);
        assert!(wal.append(create("USER_2", "Bob")).is_err());
        assert_eq!(wal.append(create("USER_3", "Carol")).unwrap(), 2);

        let targets: Vec<String> = wal
            .reader()
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.target.to_string())
            .collect();
        assert_eq!(targets, vec!["USER_1", "USER_3"]);
    }

    fn batched(max_entries: usize, interval_ms: u64, faults: &FaultInjector) -> WalOptions {
        let policy = DurabilityPolicy::Batched {
            max_entries,
            interval_ms,
        };
        let mut options = WalOptions::new(policy, 1 << 20);
        options.faults = faults.clone();
        options
    }

    #[test]
    fn test_batched_policy_syncs_at_threshold() {
        let dir = TempDir::new().unwrap();
        let faults = FaultInjector::new();
        let (mut wal, _) = WalWriter::open(dir.path(), batched(3, 3_600_000, &faults)).unwrap();

        wal.append(create("USER_1", "a")).unwrap();
        wal.append(create("USER_2", "b")).unwrap();
        assert_eq!(wal.durable_sequence(), 0);
        assert_eq!(wal.pending_entries(), 2);

        wal.append(create("USER_3", "c")).unwrap();
        assert_eq!(wal.durable_sequence(), 3);
        assert_eq!(wal.pending_entries(), 0);

        wal.append(create("USER_4", "d")).unwrap();
        assert_eq!(wal.durable_sequence(), 3);
        assert_eq!(wal.pending_entries(), 1);
        assert!(!wal.sync_if_due().unwrap());

        // Already durable: no fsync
        wal.sync_through(3).unwrap();
        assert_eq!(wal.pending_entries(), 1);

        wal.sync_through(4).unwrap();
        assert_eq!(wal.durable_sequence(), 4);
        assert_eq!(wal.pending_entries(), 0);
    }

    #[test]
    fn test_batched_policy_syncs_when_due() {
        let dir = TempDir::new().unwrap();
        let faults = FaultInjector::new();
        let (mut wal, _) = WalWriter::open(dir.path(), batched(1000, 500, &faults)).unwrap();

        wal.append(create("USER_1", "a")).unwrap();
        assert_eq!(wal.pending_entries(), 1);
        assert!(!wal.sync_if_due().unwrap());

        std::thread::sleep(std::time::Duration::from_millis(600));
        assert!(wal.sync_if_due().unwrap());
        assert_eq!(wal.durable_sequence(), 1);
        assert!(!wal.sync_if_due().unwrap());
    }

    #[test]
    fn test_failed_threshold_fsync_truncates_only_that_batch() {
        let dir = TempDir::new().unwrap();
        let faults = FaultInjector::new();
        let (mut wal, _) = WalWriter::open(dir.path(), batched(2, 3_600_000, &faults)).unwrap();

        wal.append(create("USER_1", "a")).unwrap();
        faults.arm(points::WAL_BEFORE_FSYNC);
        assert!(wal.append(create("USER_2", "b")).is_err());
        assert_eq!(wal.next_sequence(), 2);
        assert_eq!(wal.durable_sequence(), 0);
        assert_eq!(wal.pending_entries(), 1);

        assert_eq!(wal.append(create("USER_3", "c")).unwrap(), 2);
        assert_eq!(wal.durable_sequence(), 2);

        let targets: Vec<String> = wal
            .reader()
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.target.to_string())
            .collect();
        assert_eq!(targets, vec!["USER_1", "USER_3"]);
    }

    #[test]
    fn test_rotation_and_retirement() {
        let dir = TempDir::new().unwrap();
        let (mut wal, _) =
            WalWriter::open(dir.path(), WalOptions::new(DurabilityPolicy::Immediate, 64)).unwrap();
        for i in 0..5 {
            wal.append(create(&format!("USER_{}", i), "x")).unwrap();
        }
        assert!(wal.file_count() > 1);
        assert_eq!(wal.reader().read_all().unwrap().len(), 5);

        wal.retire_through(3).unwrap();
        let remaining: Vec<u64> = wal
            .reader()
            .read_all()
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert!(remaining.ends_with(&[4, 5]));
        assert!(!remaining.contains(&1));
    }

    #[test]
    fn test_retire_everything_keeps_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let mut wal = open(dir.path());
            wal.append(create("USER_1", "a")).unwrap();
            wal.append(create("USER_2", "b")).unwrap();
            wal.retire_through(2).unwrap();
            assert_eq!(wal.file_count(), 1);
        }
        let mut wal = open(dir.path());
        assert_eq!(wal.next_sequence(), 3);
        assert_eq!(wal.append(create("USER_3", "c")).unwrap(), 3);
    }

    #[test]
    fn test_incomplete_trailing_batch_is_cut() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut wal = open(dir.path());
            wal.append(create("USER_1", "a")).unwrap();
            wal.append_batch(Some(4), vec![create("ORDER_1", "o"), create("PAYMENT_1", "p")])
                .unwrap();
            path = wal.active.path.clone();
        }
        // Drop the last frame of the batch: a torn two-frame write
        let entries = WalReader::new(dir.path(), PayloadCipher::disabled())
            .read_all()
            .unwrap();
        assert_eq!(entries.len(), 3);
        let full = fs::read(&path).unwrap();
        let frame = entries[2].encode(&PayloadCipher::disabled()).unwrap();
        fs::write(&path, &full[..full.len() - frame.len()]).unwrap();

        let (wal, report) =
            WalWriter::open(dir.path(), WalOptions::new(DurabilityPolicy::Immediate, 1 << 20))
                .unwrap();
        assert_eq!(report.discarded_entries, 1);
        assert_eq!(wal.next_sequence(), 2);
        assert_eq!(wal.reader().read_all().unwrap().len(), 1);
    }
}
