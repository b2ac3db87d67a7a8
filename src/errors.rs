//! Public error taxonomy for tierdb
//!
//! Every engine operation returns `DbResult<T>`. Subsystem errors (`WalError`,
//! `SegmentError`, `SnapshotError`, `CryptoError`) carry their own codes and
//! severities and are folded into `DbError` at the engine boundary:
//!
//! - corruption / checksum / decryption classes → `IntegrityFailure`
//! - write, read and fsync classes → `IoFailure`

use thiserror::Error;

use crate::document::DocumentId;
use crate::txn::{ContextId, TxnId, TxnStatus};

/// Result type for engine operations
pub type DbResult<T> = Result<T, DbError>;

/// Engine errors
#[derive(Debug, Clone, Error)]
pub enum DbError {
    // ==================
    // Document Errors
    // ==================
    /// Read miss. Recoverable, the caller decides.
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    /// Create with an identifier that already exists. Use update instead.
    #[error("document already exists: {0}")]
    DuplicateIdentifier(DocumentId),

    /// Identifier does not follow the `<TYPE>_<opaque-id>` shape
    #[error("invalid document identifier '{0}'")]
    InvalidIdentifier(String),

    // ==================
    // Durability Errors
    // ==================
    /// Disk read or write error. Not retried beyond the durability policy.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// A transaction batch could not be made durable. Nothing was applied.
    #[error("commit of transaction {txn} failed: {reason}")]
    CommitFailure { txn: TxnId, reason: String },

    /// Checksum or decryption mismatch. Fatal for the affected entry only.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    // ==================
    // Transaction Errors
    // ==================
    /// The execution context already has an open transaction
    #[error("context {context} already has open transaction {open}")]
    TransactionAlreadyOpen { context: ContextId, open: TxnId },

    /// `undo_last` on a transaction with no staged entries
    #[error("transaction {0} has nothing to undo")]
    NothingToUndo(TxnId),

    /// Transaction id was never issued or has aged out of the status history
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxnId),

    /// Operation on a transaction that is already committed or rolled back
    #[error("transaction {txn} is {status}")]
    TransactionClosed { txn: TxnId, status: TxnStatus },

    // ==================
    // Engine Errors
    // ==================
    /// Configuration rejected at open
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine has been shut down
    #[error("database is shut down")]
    Closed,
}

impl DbError {
    /// Build an I/O failure from any displayable cause
    pub fn io(context: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        DbError::IoFailure(format!("{}: {}", context, cause))
    }

    /// Returns true for the programmer-error class (propagated immediately,
    /// never worth retrying)
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            DbError::TransactionAlreadyOpen { .. }
                | DbError::NothingToUndo(_)
                | DbError::UnknownTransaction(_)
                | DbError::TransactionClosed { .. }
                | DbError::InvalidIdentifier(_)
        )
    }

    /// Returns true when the error indicates damaged persisted data
    pub fn is_integrity(&self) -> bool {
        matches!(self, DbError::IntegrityFailure(_))
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::IoFailure(e.to_string())
    }
}
