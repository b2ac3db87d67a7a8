//! Batch framing and fsync scheduling
//!
//! A `WalBatch` concatenates the frames of one transaction so they reach the
//! file in a single `write`. A `SyncTracker` decides when pending writes must
//! be fsynced under the configured `DurabilityPolicy`.

use std::time::{Duration, Instant};

use crate::config::DurabilityPolicy;

/// Frames of one append, written with one call
#[derive(Debug, Default)]
pub struct WalBatch {
    buffer: Vec<u8>,
    sequence_numbers: Vec<u64>,
}

impl WalBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an encoded frame. Frames must be added in sequence order.
    pub fn add_frame(&mut self, frame: &[u8], sequence_number: u64) {
        self.buffer.extend_from_slice(frame);
        self.sequence_numbers.push(sequence_number);
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn sequence_numbers(&self) -> &[u64] {
        &self.sequence_numbers
    }

    pub fn into_sequence_numbers(self) -> Vec<u64> {
        self.sequence_numbers
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_numbers.is_empty()
    }
}

/// Tracks un-fsynced entries against the durability policy
#[derive(Debug)]
pub struct SyncTracker {
    policy: DurabilityPolicy,
    pending_entries: usize,
    last_sync: Instant,
}

impl SyncTracker {
    pub fn new(policy: DurabilityPolicy) -> Self {
        Self {
            policy,
            pending_entries: 0,
            last_sync: Instant::now(),
        }
    }

    pub fn policy(&self) -> DurabilityPolicy {
        self.policy
    }

    pub fn pending_entries(&self) -> usize {
        self.pending_entries
    }

    /// Record `count` freshly written, un-fsynced entries
    pub fn record_written(&mut self, count: usize) {
        self.pending_entries += count;
    }

    /// Forget entries that were written and then truncated away
    pub fn record_discarded(&mut self, count: usize) {
        self.pending_entries = self.pending_entries.saturating_sub(count);
    }

    pub fn record_synced(&mut self) {
        self.pending_entries = 0;
        self.last_sync = Instant::now();
    }

    /// True when an append must fsync before returning
    pub fn must_sync_now(&self) -> bool {
        if self.pending_entries == 0 {
            return false;
        }
        match self.policy {
            DurabilityPolicy::Immediate => true,
            DurabilityPolicy::Batched {
                max_entries,
                interval_ms,
            } => {
                self.pending_entries >= max_entries
                    || self.last_sync.elapsed() >= Duration::from_millis(interval_ms)
            }
        }
    }

    /// True when the batch interval has passed with entries still pending.
    /// Polled by the maintenance worker so a quiet log still meets its
    /// deadline.
    pub fn deadline_passed(&self) -> bool {
        match self.policy {
            DurabilityPolicy::Immediate => self.pending_entries > 0,
            DurabilityPolicy::Batched { interval_ms, .. } => {
                self.pending_entries > 0
                    && self.last_sync.elapsed() >= Duration::from_millis(interval_ms)
            }
        }
    }
}
