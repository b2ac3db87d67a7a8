//! Snapshot creation
//!
//! Sequence:
//!
//! 1. Create `snapshot-<seq>.tmp/`
//! 2. Write every live document to `state.dat` as checksummed frames
//! 3. fsync state.dat
//! 4. Write and fsync `manifest.json`
//! 5. fsync the temporary directory
//! 6. Rename to `snapshot-<seq>/` and fsync `snapshots/`
//!
//! A snapshot therefore becomes visible all at once. Any failure removes the
//! temporary directory; a leftover from a crash is removed on the next
//! listing.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::codec::fsync_dir;
use crate::crypto::PayloadCipher;
use crate::fault::{points, FaultInjector};
use crate::segment::SegmentRecord;

use super::checksum::{compute_file_checksum, format_checksum};
use super::errors::{SnapshotError, SnapshotResult};
use super::manifest::SnapshotManifest;

pub const STATE_FILE: &str = "state.dat";
pub const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_PREFIX: &str = "snapshot-";
const TEMP_SUFFIX: &str = ".tmp";

pub fn snapshot_dir_name(sequence: u64) -> String {
    format!("{}{:020}", SNAPSHOT_PREFIX, sequence)
}

pub fn parse_snapshot_dir_name(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?.parse().ok()
}

pub(super) fn is_temp_dir_name(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

fn fsync_dir_checked(path: &Path) -> SnapshotResult<()> {
    fsync_dir(path).map_err(|e| {
        SnapshotError::io_error(format!("fsync directory failed: {}", path.display()), e)
    })
}

/// Write a snapshot of `records` taken at `sequence` under `snapshots_dir`.
/// Returns the final snapshot directory.
pub fn create_snapshot_impl<I>(
    snapshots_dir: &Path,
    sequence: u64,
    records: I,
    cipher: &PayloadCipher,
    faults: &FaultInjector,
) -> SnapshotResult<(PathBuf, SnapshotManifest)>
where
    I: IntoIterator<Item = SegmentRecord>,
{
    fs::create_dir_all(snapshots_dir)
        .map_err(|e| SnapshotError::io_error_at_path(snapshots_dir, e))?;

    let final_dir = snapshots_dir.join(snapshot_dir_name(sequence));
    let temp_dir = snapshots_dir.join(format!("{}{}", snapshot_dir_name(sequence), TEMP_SUFFIX));
    if temp_dir.exists() {
        fs::remove_dir_all(&temp_dir).map_err(|e| SnapshotError::io_error_at_path(&temp_dir, e))?;
    }
    fs::create_dir_all(&temp_dir).map_err(|e| SnapshotError::io_error_at_path(&temp_dir, e))?;

    let result = write_contents(&temp_dir, sequence, records, cipher, faults);
    let manifest = match result {
        Ok(manifest) => manifest,
        Err(e) => {
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(e);
        }
    };

    // A snapshot at the same sequence holds the same state
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)
            .map_err(|e| SnapshotError::io_error_at_path(&final_dir, e))?;
    }
    fs::rename(&temp_dir, &final_dir).map_err(|e| {
        SnapshotError::io_error(format!("Failed to publish snapshot: {}", final_dir.display()), e)
    })?;
    fsync_dir_checked(snapshots_dir)?;

    Ok((final_dir, manifest))
}

fn write_contents<I>(
    dir: &Path,
    sequence: u64,
    records: I,
    cipher: &PayloadCipher,
    faults: &FaultInjector,
) -> SnapshotResult<SnapshotManifest>
where
    I: IntoIterator<Item = SegmentRecord>,
{
    let state_path = dir.join(STATE_FILE);
    let file = File::create(&state_path)
        .map_err(|e| SnapshotError::io_error_at_path(&state_path, e))?;
    let mut writer = BufWriter::new(file);

    let mut count = 0u64;
    for record in records {
        let frame = record.encode(cipher).map_err(|e| {
            SnapshotError::io_error(
                format!("Failed to encode {}", record.id),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            )
        })?;
        writer
            .write_all(&frame)
            .map_err(|e| SnapshotError::io_error_at_path(&state_path, e))?;
        count += 1;
    }
    let file = writer
        .into_inner()
        .map_err(|e| SnapshotError::io_error_at_path(&state_path, e.into_error()))?;
    file.sync_all().map_err(|e| {
        SnapshotError::io_error(format!("fsync failed for: {}", state_path.display()), e)
    })?;

    let checksum = format_checksum(compute_file_checksum(&state_path)?);
    let created_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let manifest = SnapshotManifest::new(sequence, created_at, count, checksum, cipher.is_enabled());

    faults
        .check(points::SNAPSHOT_BEFORE_MANIFEST)
        .map_err(|e| SnapshotError::manifest_io_error("Failed to write manifest", e))?;
    manifest.write_to_file(&dir.join(MANIFEST_FILE))?;
    fsync_dir_checked(dir)?;

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use serde_json::json;
    use tempfile::TempDir;

    fn records() -> Vec<SegmentRecord> {
        vec![SegmentRecord::live(
            DocumentId::parse("USER_1").unwrap(),
            3,
            json!({"name": "Alice"}).as_object().cloned().unwrap(),
        )]
    }

    #[test]
    fn test_snapshot_dir_names() {
        assert_eq!(snapshot_dir_name(42), "snapshot-00000000000000000042");
        assert_eq!(parse_snapshot_dir_name("snapshot-00000000000000000042"), Some(42));
        assert_eq!(parse_snapshot_dir_name("snapshot-00000000000000000042.tmp"), None);
        assert!(is_temp_dir_name("snapshot-00000000000000000042.tmp"));
    }

    #[test]
    fn test_create_publishes_complete_directory() {
        let temp = TempDir::new().unwrap();
        let (dir, manifest) = create_snapshot_impl(
            temp.path(),
            3,
            records(),
            &PayloadCipher::disabled(),
            &FaultInjector::new(),
        )
        .unwrap();

        assert!(dir.join(STATE_FILE).exists());
        assert!(dir.join(MANIFEST_FILE).exists());
        assert_eq!(manifest.sequence, 3);
        assert_eq!(manifest.document_count, 1);
        assert!(!manifest.encrypted);
    }

    #[test]
    fn test_manifest_failure_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let faults = FaultInjector::new();
        faults.arm(points::SNAPSHOT_BEFORE_MANIFEST);

        let result = create_snapshot_impl(
            temp.path(),
            3,
            records(),
            &PayloadCipher::disabled(),
            &faults,
        );
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
