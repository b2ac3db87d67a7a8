//! Snapshot error types
//!
//! Error codes:
//! - TIER_SNAPSHOT_IO (ERROR severity)
//! - TIER_SNAPSHOT_MANIFEST (ERROR severity)
//! - TIER_SNAPSHOT_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;
use std::path::Path;

use crate::errors::DbError;
use crate::wal::Severity;

/// Snapshot-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotErrorCode {
    /// Reading or writing snapshot files failed
    TierSnapshotIo,
    /// Manifest missing, unreadable or malformed
    TierSnapshotManifest,
    /// State file does not match its manifest
    TierSnapshotCorruption,
}

impl SnapshotErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            SnapshotErrorCode::TierSnapshotIo => "TIER_SNAPSHOT_IO",
            SnapshotErrorCode::TierSnapshotManifest => "TIER_SNAPSHOT_MANIFEST",
            SnapshotErrorCode::TierSnapshotCorruption => "TIER_SNAPSHOT_CORRUPTION",
        }
    }

    /// A failed snapshot write never endangers committed data, so only a
    /// damaged snapshot being read back is fatal
    pub fn severity(&self) -> Severity {
        match self {
            SnapshotErrorCode::TierSnapshotCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for SnapshotErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Snapshot error with code, message, optional details and source
#[derive(Debug)]
pub struct SnapshotError {
    code: SnapshotErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl SnapshotError {
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: SnapshotErrorCode::TierSnapshotIo,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at path: {}", path.display()), source)
    }

    pub fn manifest_error(message: impl Into<String>) -> Self {
        Self {
            code: SnapshotErrorCode::TierSnapshotManifest,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn manifest_io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: SnapshotErrorCode::TierSnapshotManifest,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: SnapshotErrorCode::TierSnapshotCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn code(&self) -> SnapshotErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_corruption(&self) -> bool {
        self.code == SnapshotErrorCode::TierSnapshotCorruption
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<SnapshotError> for DbError {
    fn from(err: SnapshotError) -> Self {
        if err.is_corruption() {
            DbError::IntegrityFailure(err.to_string())
        } else {
            DbError::IoFailure(err.to_string())
        }
    }
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SnapshotErrorCode::TierSnapshotIo.code(), "TIER_SNAPSHOT_IO");
        assert_eq!(SnapshotErrorCode::TierSnapshotManifest.severity(), Severity::Error);
        assert_eq!(SnapshotErrorCode::TierSnapshotCorruption.severity(), Severity::Fatal);
    }

    #[test]
    fn test_display_contains_details() {
        let err = SnapshotError::corruption("state checksum mismatch")
            .with_details("snapshot-00000000000000000042");
        let display = err.to_string();
        assert!(display.contains("TIER_SNAPSHOT_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("snapshot-00000000000000000042"));
        assert!(matches!(DbError::from(err), DbError::IntegrityFailure(_)));
    }

    #[test]
    fn test_io_error_with_path() {
        let err = SnapshotError::io_error_at_path(
            Path::new("/data/snapshots/state.dat"),
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        assert!(err.message().contains("/data/snapshots/state.dat"));
        assert!(matches!(DbError::from(err), DbError::IoFailure(_)));
    }
}
