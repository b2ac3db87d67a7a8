//! Fault injection for testing durability paths
//!
//! Each engine instance owns a `FaultInjector`. Arming a named point makes
//! the next I/O at that point fail with an injected `io::Error` instead of
//! touching the disk. Instances are independent, so tests running in
//! parallel never see each other's faults.
//!
//! ```ignore
//! db.fault_injector().arm(points::WAL_BEFORE_WRITE);
//! assert!(matches!(db.commit(txn), Err(DbError::CommitFailure { .. })));
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

/// How long an armed point stays armed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail the next hit, then disarm
    Once,
    /// Fail every hit until disarmed
    Always,
}

/// Shared, cheaply cloneable set of armed fault points
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    armed: Arc<Mutex<HashMap<&'static str, FaultMode>>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next hit of `point`
    pub fn arm(&self, point: &'static str) {
        self.set(point, Some(FaultMode::Once));
    }

    /// Fail every hit of `point` until `disarm`
    pub fn arm_always(&self, point: &'static str) {
        self.set(point, Some(FaultMode::Always));
    }

    pub fn disarm(&self, point: &'static str) {
        self.set(point, None);
    }

    pub fn is_armed(&self, point: &str) -> bool {
        match self.armed.lock() {
            Ok(armed) => armed.contains_key(point),
            Err(poisoned) => poisoned.into_inner().contains_key(point),
        }
    }

    /// Called by I/O paths. Returns the injected error when `point` is armed.
    pub fn check(&self, point: &'static str) -> io::Result<()> {
        let mut armed = match self.armed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match armed.get(point).copied() {
            None => Ok(()),
            Some(mode) => {
                if mode == FaultMode::Once {
                    armed.remove(point);
                }
                tracing::debug!(point, "injected fault triggered");
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("injected fault at {}", point),
                ))
            }
        }
    }

    fn set(&self, point: &'static str, mode: Option<FaultMode>) {
        let mut armed = match self.armed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match mode {
            Some(mode) => {
                armed.insert(point, mode);
            }
            None => {
                armed.remove(point);
            }
        }
    }
}

/// All defined fault point names
pub mod points {
    /// Before the frames of an append or batch are written
    pub const WAL_BEFORE_WRITE: &str = "wal_before_write";
    /// After the write, before its fsync
    pub const WAL_BEFORE_FSYNC: &str = "wal_before_fsync";
    /// Before a record is appended to a segment
    pub const SEGMENT_BEFORE_WRITE: &str = "segment_before_write";
    /// After a snapshot's state file is written, before its manifest
    pub const SNAPSHOT_BEFORE_MANIFEST: &str = "snapshot_before_manifest";

    pub fn all() -> &'static [&'static str] {
        &[
            WAL_BEFORE_WRITE,
            WAL_BEFORE_FSYNC,
            SEGMENT_BEFORE_WRITE,
            SNAPSHOT_BEFORE_MANIFEST,
        ]
    }
}
