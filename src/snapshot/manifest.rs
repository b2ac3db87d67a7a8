//! Snapshot manifest
//!
//! `manifest.json` is the authoritative snapshot descriptor. A snapshot
//! directory without a readable manifest is not a snapshot.
//!
//! ```json
//! {
//!   "sequence": 1042,
//!   "created_at": "2026-02-04T11:30:00Z",
//!   "document_count": 17,
//!   "state_checksum": "crc32:deadbeef",
//!   "encrypted": false,
//!   "format_version": 1
//! }
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{SnapshotError, SnapshotResult};

pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotManifest {
    /// Every change with a sequence at or below this is in the snapshot
    pub sequence: u64,

    /// RFC3339 creation time
    pub created_at: String,

    pub document_count: u64,

    /// CRC32 of state.dat (`crc32:XXXXXXXX`)
    pub state_checksum: String,

    /// Whether document bodies in state.dat are sealed
    #[serde(default)]
    pub encrypted: bool,

    pub format_version: u8,
}

impl SnapshotManifest {
    pub fn new(
        sequence: u64,
        created_at: impl Into<String>,
        document_count: u64,
        state_checksum: impl Into<String>,
        encrypted: bool,
    ) -> Self {
        Self {
            sequence,
            created_at: created_at.into(),
            document_count,
            state_checksum: state_checksum.into(),
            encrypted,
            format_version: FORMAT_VERSION,
        }
    }

    pub fn to_json(&self) -> SnapshotResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            SnapshotError::manifest_error(format!("Failed to serialize manifest: {}", e))
        })
    }

    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| {
            SnapshotError::manifest_error(format!("Failed to parse manifest: {}", e))
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(SnapshotError::manifest_error(format!(
                "unsupported manifest format version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }

    /// Write and fsync the manifest.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::manifest_io_error` if write or fsync fails.
    pub fn write_to_file(&self, path: &Path) -> SnapshotResult<()> {
        let json = self.to_json()?;

        let mut file = File::create(path).map_err(|e| {
            SnapshotError::manifest_io_error(
                format!("Failed to create manifest file: {}", path.display()),
                e,
            )
        })?;

        file.write_all(json.as_bytes()).map_err(|e| {
            SnapshotError::manifest_io_error(
                format!("Failed to write manifest: {}", path.display()),
                e,
            )
        })?;

        file.sync_all().map_err(|e| {
            SnapshotError::manifest_io_error(
                format!("Failed to fsync manifest: {}", path.display()),
                e,
            )
        })
    }

    pub fn read_from_file(path: &Path) -> SnapshotResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SnapshotError::manifest_io_error(
                format!("Failed to read manifest: {}", path.display()),
                e,
            )
        })?;
        Self::from_json(&content)
    }
}
