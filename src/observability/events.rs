//! Observable engine events
//!
//! Every significant lifecycle step is logged through `tracing` with an
//! `event` field taken from this enum, so log lines stay greppable.

use std::fmt;

/// Observable events in tierdb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Engine open begins
    StartupBegin,
    /// Recovery finished, engine serving
    StartupComplete,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete, clean marker written
    ShutdownComplete,
    /// Configuration loaded from file
    ConfigLoaded,

    // WAL
    WalOpen,
    /// Active WAL file sealed and replaced
    WalRotate,
    /// Sealed WAL files deleted after a checkpoint
    WalRetire,
    /// Torn tail cut at open
    WalTailTruncated,
    /// WAL corruption detected (FATAL)
    WalCorruption,

    // Segments
    SegmentOpen,
    /// Active segment sealed
    SegmentRotate,
    /// Torn segment tail cut at open
    SegmentTailTruncated,
    CompactionStart,
    CompactionComplete,
    CompactionFailed,

    // Cache
    /// Eviction cycle finished
    EvictionComplete,
    /// Dirty entry could not be flushed, retried next cycle
    EvictionFlushFailed,

    // Transactions
    /// WAL batch for a commit failed
    CommitFailed,

    // Snapshot / Checkpoint
    CheckpointStart,
    CheckpointComplete,
    CheckpointFailed,
    SnapshotCreated,
    SnapshotPruned,

    // Recovery
    RecoveryStart,
    RecoveryReplayBegin,
    RecoveryReplayComplete,
    /// Segments rebuilt from a snapshot
    RecoverySnapshotRestore,
    /// Segments discarded and rebuilt by replaying the whole WAL
    RecoveryWalRebuild,
    /// Recovery failed (FATAL)
    RecoveryFailed,

    // Notifications
    /// Subscription removed because its delivery channel closed
    SubscriptionDropped,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StartupBegin => "TIERDB_STARTUP_BEGIN",
            Event::StartupComplete => "TIERDB_STARTUP_COMPLETE",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::WalOpen => "WAL_OPEN",
            Event::WalRotate => "WAL_ROTATE",
            Event::WalRetire => "WAL_RETIRE",
            Event::WalTailTruncated => "WAL_TAIL_TRUNCATED",
            Event::WalCorruption => "WAL_CORRUPTION",

            Event::SegmentOpen => "SEGMENT_OPEN",
            Event::SegmentRotate => "SEGMENT_ROTATE",
            Event::SegmentTailTruncated => "SEGMENT_TAIL_TRUNCATED",
            Event::CompactionStart => "COMPACTION_BEGIN",
            Event::CompactionComplete => "COMPACTION_COMPLETE",
            Event::CompactionFailed => "COMPACTION_FAILED",

            Event::EvictionComplete => "EVICTION_COMPLETE",
            Event::EvictionFlushFailed => "EVICTION_FLUSH_FAILED",

            Event::CommitFailed => "COMMIT_FAILED",

            Event::CheckpointStart => "CHECKPOINT_BEGIN",
            Event::CheckpointComplete => "CHECKPOINT_COMPLETE",
            Event::CheckpointFailed => "CHECKPOINT_FAILED",
            Event::SnapshotCreated => "SNAPSHOT_CREATED",
            Event::SnapshotPruned => "SNAPSHOT_PRUNED",

            Event::RecoveryStart => "RECOVERY_BEGIN",
            Event::RecoveryReplayBegin => "WAL_REPLAY_BEGIN",
            Event::RecoveryReplayComplete => "WAL_REPLAY_COMPLETE",
            Event::RecoverySnapshotRestore => "SNAPSHOT_RESTORE",
            Event::RecoveryWalRebuild => "SEGMENT_REBUILD_FROM_WAL",
            Event::RecoveryFailed => "RECOVERY_FAILED",

            Event::SubscriptionDropped => "SUBSCRIPTION_DROPPED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::WalCorruption | Event::RecoveryFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_upper_snake_case() {
        let events = [
            Event::StartupBegin,
            Event::WalRotate,
            Event::WalTailTruncated,
            Event::CompactionComplete,
            Event::EvictionFlushFailed,
            Event::CheckpointComplete,
            Event::RecoverySnapshotRestore,
            Event::RecoveryWalRebuild,
            Event::SubscriptionDropped,
        ];
        for event in events {
            let s = event.as_str();
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'), "{}", s);
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::WalCorruption.is_fatal());
        assert!(Event::RecoveryFailed.is_fatal());
        assert!(!Event::CheckpointFailed.is_fatal());
    }
}
