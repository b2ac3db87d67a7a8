//! Snapshot loading and verification
//!
//! A snapshot is only trusted after its state file matches the manifest
//! checksum and every frame in it decodes. Anything less is
//! `TIER_SNAPSHOT_CORRUPTION` and recovery moves on to an older snapshot.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::codec::{read_frame, FrameRead};
use crate::crypto::PayloadCipher;
use crate::segment::SegmentRecord;

use super::checksum::{compute_file_checksum, parse_checksum};
use super::creator::{MANIFEST_FILE, STATE_FILE};
use super::errors::{SnapshotError, SnapshotResult};
use super::manifest::SnapshotManifest;

/// Read the manifest and every record of the snapshot in `dir`
pub fn load_snapshot_impl(
    dir: &Path,
    cipher: &PayloadCipher,
) -> SnapshotResult<(SnapshotManifest, Vec<SegmentRecord>)> {
    let label = dir.display().to_string();
    let manifest = SnapshotManifest::read_from_file(&dir.join(MANIFEST_FILE))?;

    if manifest.encrypted != cipher.is_enabled() {
        return Err(SnapshotError::corruption(if manifest.encrypted {
            "snapshot is encrypted but no key is configured"
        } else {
            "snapshot is not encrypted but a key is configured"
        })
        .with_details(label));
    }

    let state_path = dir.join(STATE_FILE);
    let expected = parse_checksum(&manifest.state_checksum).ok_or_else(|| {
        SnapshotError::manifest_error(format!(
            "malformed state checksum '{}'",
            manifest.state_checksum
        ))
    })?;
    let actual = compute_file_checksum(&state_path)?;
    if actual != expected {
        return Err(SnapshotError::corruption("state checksum mismatch").with_details(format!(
            "{}: expected {:08x}, found {:08x}",
            label, expected, actual
        )));
    }

    let file = File::open(&state_path).map_err(|e| SnapshotError::io_error_at_path(&state_path, e))?;
    let mut remaining = file
        .metadata()
        .map_err(|e| SnapshotError::io_error_at_path(&state_path, e))?
        .len();
    let mut reader = BufReader::new(file);

    let mut records = Vec::with_capacity(manifest.document_count as usize);
    loop {
        let read = read_frame(&mut reader, remaining)
            .map_err(|e| SnapshotError::io_error_at_path(&state_path, e))?;
        match read {
            FrameRead::Eof => break,
            FrameRead::Frame { body, frame_len } => {
                remaining -= frame_len;
                let record = SegmentRecord::decode(&body, cipher).map_err(|e| {
                    SnapshotError::corruption(e.to_string()).with_details(label.clone())
                })?;
                records.push(record);
            }
            FrameRead::Truncated => {
                return Err(SnapshotError::corruption("state file truncated").with_details(label))
            }
            FrameRead::Corrupt { reason, .. } => {
                return Err(SnapshotError::corruption(reason).with_details(label))
            }
        }
    }

    if records.len() as u64 != manifest.document_count {
        return Err(SnapshotError::corruption(format!(
            "manifest lists {} documents, state file holds {}",
            manifest.document_count,
            records.len()
        ))
        .with_details(label));
    }

    Ok((manifest, records))
}
