//! Engine counters
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics; a snapshot is not a consistent cut

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by all engine components
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Entries appended to the WAL
    wal_entries: AtomicU64,
    /// Transactions committed (including auto-committed single ops)
    commits: AtomicU64,
    /// Commits whose WAL batch failed
    commit_failures: AtomicU64,
    /// Transactions rolled back explicitly or by a failed commit
    rollbacks: AtomicU64,
    /// Documents written to segments
    segment_flushes: AtomicU64,
    /// Flushes that failed during eviction or checkpoint
    flush_failures: AtomicU64,
    compactions: AtomicU64,
    compaction_bytes_freed: AtomicU64,
    checkpoints: AtomicU64,
    checkpoint_failures: AtomicU64,
    /// Change events released by the notifier
    events_published: AtomicU64,
    /// Subscriptions dropped for a closed delivery channel
    subscriptions_dropped: AtomicU64,
    /// Entries applied by WAL replay at startup
    replayed_entries: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wal_entries(&self, n: u64) {
        self.wal_entries.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commit_failures(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_segment_flushes(&self, n: u64) {
        self.segment_flushes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_flush_failures(&self, n: u64) {
        self.flush_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_compaction(&self, freed_bytes: u64) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        self.compaction_bytes_freed
            .fetch_add(freed_bytes, Ordering::Relaxed);
    }

    pub fn increment_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoint_failures(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_events_published(&self, n: u64) {
        self.events_published.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_subscriptions_dropped(&self, n: u64) {
        self.subscriptions_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_replayed_entries(&self, n: u64) {
        self.replayed_entries.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            wal_entries: self.wal_entries.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            segment_flushes: self.segment_flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            compaction_bytes_freed: self.compaction_bytes_freed.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            subscriptions_dropped: self.subscriptions_dropped.load(Ordering::Relaxed),
            replayed_entries: self.replayed_entries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub wal_entries: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub rollbacks: u64,
    pub segment_flushes: u64,
    pub flush_failures: u64,
    pub compactions: u64,
    pub compaction_bytes_freed: u64,
    pub checkpoints: u64,
    pub checkpoint_failures: u64,
    pub events_published: u64,
    pub subscriptions_dropped: u64,
    pub replayed_entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_registry_is_zeroed() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_compaction_records_bytes() {
        let registry = MetricsRegistry::new();
        registry.record_compaction(100);
        registry.record_compaction(50);
        let snap = registry.snapshot();
        assert_eq!(snap.compactions, 2);
        assert_eq!(snap.compaction_bytes_freed, 150);
    }

    #[test]
    fn test_thread_safety() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_commits();
                        reg.add_wal_entries(2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = registry.snapshot();
        assert_eq!(snap.commits, 800);
        assert_eq!(snap.wal_entries, 1600);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_checkpoints();
        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["checkpoints"], 1);
    }
}
