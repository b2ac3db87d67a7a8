//! CRC32 checksums of snapshot files
//!
//! Manifest checksums are written as `crc32:xxxxxxxx` (lowercase hex, zero
//! padded).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crc32fast::Hasher;

use super::errors::{SnapshotError, SnapshotResult};

/// CRC32 of a whole file, read in chunks
pub fn compute_file_checksum(path: &Path) -> SnapshotResult<u32> {
    let file = File::open(path).map_err(|e| SnapshotError::io_error_at_path(path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| SnapshotError::io_error_at_path(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

pub fn format_checksum(checksum: u32) -> String {
    format!("crc32:{:08x}", checksum)
}

/// Inverse of `format_checksum`; `None` if malformed
pub fn parse_checksum(formatted: &str) -> Option<u32> {
    let stripped = formatted.strip_prefix("crc32:")?;
    u32::from_str_radix(stripped, 16).ok()
}
