//! WAL error types
//!
//! Error codes:
//! - TIER_WAL_APPEND_FAILED (ERROR severity)
//! - TIER_WAL_FSYNC_FAILED (FATAL severity)
//! - TIER_WAL_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

use crate::errors::DbError;

/// Severity levels shared by the storage subsystems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, engine continues
    Error,
    /// Persisted state can no longer be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// WAL-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalErrorCode {
    /// WAL write (or file management) failed
    TierWalAppendFailed,
    /// WAL fsync failed
    TierWalFsyncFailed,
    /// Checksum, framing, sequence or payload failure
    TierWalCorruption,
}

impl WalErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            WalErrorCode::TierWalAppendFailed => "TIER_WAL_APPEND_FAILED",
            WalErrorCode::TierWalFsyncFailed => "TIER_WAL_FSYNC_FAILED",
            WalErrorCode::TierWalCorruption => "TIER_WAL_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            WalErrorCode::TierWalAppendFailed => Severity::Error,
            WalErrorCode::TierWalFsyncFailed => Severity::Fatal,
            WalErrorCode::TierWalCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for WalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// WAL error with code, message, optional context and cause
#[derive(Debug)]
pub struct WalError {
    code: WalErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl WalError {
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: WalErrorCode::TierWalAppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: WalErrorCode::TierWalFsyncFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: WalErrorCode::TierWalCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn corruption_at_sequence(sequence: u64, reason: impl Into<String>) -> Self {
        Self {
            code: WalErrorCode::TierWalCorruption,
            message: reason.into(),
            details: Some(format!("sequence_number: {}", sequence)),
            source: None,
        }
    }

    /// Corruption at a byte offset of a named WAL file
    pub fn corruption_at_offset(file: &str, offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: WalErrorCode::TierWalCorruption,
            message: reason.into(),
            details: Some(format!("file: {}, byte_offset: {}", file, offset)),
            source: None,
        }
    }

    pub fn code(&self) -> WalErrorCode {
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

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_corruption(&self) -> bool {
        self.code == WalErrorCode::TierWalCorruption
    }
}

impl fmt::Display for WalError {
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

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<WalError> for DbError {
    fn from(err: WalError) -> Self {
        if err.is_corruption() {
            DbError::IntegrityFailure(err.to_string())
        } else {
            DbError::IoFailure(err.to_string())
        }
    }
}

/// Result type for WAL operations
pub type WalResult<T> = Result<T, WalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(WalErrorCode::TierWalAppendFailed.code(), "TIER_WAL_APPEND_FAILED");
        assert_eq!(WalErrorCode::TierWalFsyncFailed.code(), "TIER_WAL_FSYNC_FAILED");
        assert_eq!(WalErrorCode::TierWalCorruption.code(), "TIER_WAL_CORRUPTION");
    }

    #[test]
    fn test_fsync_failed_is_fatal() {
        let err = WalError::fsync_failed(
            "fsync failed",
            io::Error::new(io::ErrorKind::Other, "disk error"),
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_append_failed_is_not_fatal() {
        let err = WalError::append_failed(
            "write failed",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(!err.is_fatal());
        assert!(matches!(DbError::from(err), DbError::IoFailure(_)));
    }

    #[test]
    fn test_corruption_maps_to_integrity_failure() {
        let err = WalError::corruption_at_sequence(42, "checksum mismatch");
        let display = err.to_string();
        assert!(display.contains("TIER_WAL_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("sequence_number: 42"));
        assert!(matches!(DbError::from(err), DbError::IntegrityFailure(_)));
    }
}
