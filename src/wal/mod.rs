//! Write-ahead log
//!
//! The WAL is the durable record of intent and the source of truth during
//! recovery. No mutation is applied to the cache before its entry has been
//! written here, and no document reaches a segment before its entry is
//! durable.
//!
//! # Guarantees
//!
//! - Sequence numbers are monotonic and gapless, never reused
//! - A transaction batch is written with one `write` and replays
//!   all-or-nothing
//! - Every entry is CRC32-checked on read
//! - Rotation never exposes a partially created file

mod batching;
mod errors;
mod reader;
mod record;
mod writer;

pub use batching::{SyncTracker, WalBatch};
pub use errors::{Severity, WalError, WalErrorCode, WalResult};
pub use reader::{list_wal_files, wal_file_name, WalFile, WalFileReader, WalReader, WalReplay};
pub use record::{OpKind, PendingEntry, WalEntry, WalPayload};
pub use writer::{WalOpenReport, WalOptions, WalWriter};
