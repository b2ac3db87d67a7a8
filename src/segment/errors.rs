//! Segment store error types
//!
//! Error codes:
//! - TIER_SEGMENT_IO_ERROR (ERROR severity)
//! - TIER_SEGMENT_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

use crate::errors::DbError;
use crate::wal::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentErrorCode {
    /// Disk I/O failure
    TierSegmentIoError,
    /// Checksum, framing or payload failure
    TierSegmentCorruption,
}

impl SegmentErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            SegmentErrorCode::TierSegmentIoError => "TIER_SEGMENT_IO_ERROR",
            SegmentErrorCode::TierSegmentCorruption => "TIER_SEGMENT_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SegmentErrorCode::TierSegmentIoError => Severity::Error,
            SegmentErrorCode::TierSegmentCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for SegmentErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Segment store error
#[derive(Debug)]
pub struct SegmentError {
    code: SegmentErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl SegmentError {
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: SegmentErrorCode::TierSegmentIoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: SegmentErrorCode::TierSegmentCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Corruption at a byte offset of a segment file
    pub fn corruption_at(segment: u32, offset: u64, message: impl Into<String>) -> Self {
        Self {
            code: SegmentErrorCode::TierSegmentCorruption,
            message: message.into(),
            details: Some(format!("segment: {}, byte_offset: {}", segment, offset)),
            source: None,
        }
    }

    pub fn code(&self) -> SegmentErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_corruption(&self) -> bool {
        self.code == SegmentErrorCode::TierSegmentCorruption
    }
}

impl fmt::Display for SegmentError {
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

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<SegmentError> for DbError {
    fn from(err: SegmentError) -> Self {
        if err.is_corruption() {
            DbError::IntegrityFailure(err.to_string())
        } else {
            DbError::IoFailure(err.to_string())
        }
    }
}

pub type SegmentResult<T> = Result<T, SegmentError>;
