//! The database engine
//!
//! `Database` wires the WAL, the cache and segment tiers, transactions, the
//! query engine and the change notifier into one explicitly owned instance.
//!
//! # Write path
//!
//! 1. Lock the stripes of every target id (ascending stripe order)
//! 2. Resolve the operations against current state
//! 3. Append them to the WAL as one batch
//! 4. Apply them to the cache as dirty entries
//! 5. Release the stripes and publish change events
//! 6. Evict if the cache is over budget, fsyncing the WAL first
//!
//! Steps 3 and 4 run under the shared side of the commit gate. Checkpoints
//! and subscription snapshots take the exclusive side, so they never observe
//! an entry that is in the WAL but not yet in the cache.

mod checkpoint;
mod locks;
mod maintenance;

pub use checkpoint::CheckpointReport;
pub use locks::DEFAULT_STRIPES;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::{CacheStats, EvictionReport, TieredStore};
use crate::config::EngineConfig;
use crate::crypto::PayloadCipher;
use crate::document::{Attributes, Collection, Document, DocumentId, Patch};
use crate::errors::{DbError, DbResult};
use crate::fault::FaultInjector;
use crate::notify::{
    ChangeEvent, ChangeNotifier, CurrentState, EventSender, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionTarget,
};
use crate::observability::{Event, MetricsRegistry, MetricsSnapshot};
use crate::query::{Filter, QueryEngine};
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::segment::SegmentStats;
use crate::snapshot::SnapshotManager;
use crate::sync::{lock, read, write};
use crate::txn::{ContextId, Overlay, ResolvedChange, StagedOp, TransactionCoordinator, TxnId, TxnStatus};
use crate::wal::WalWriter;

use locks::LockStripes;
use maintenance::MaintenanceWorker;

/// WAL counters for `stats()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalStats {
    pub next_sequence: u64,
    pub durable_sequence: u64,
    pub files: usize,
    pub total_bytes: u64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub cache: CacheStats,
    pub segments: SegmentStats,
    pub wal: WalStats,
    pub metrics: MetricsSnapshot,
    pub open_transactions: usize,
    pub subscriptions: usize,
}

/// State shared with the maintenance worker
pub(crate) struct Inner {
    config: EngineConfig,
    store: TieredStore,
    wal: Mutex<WalWriter>,
    commit_gate: RwLock<()>,
    stripes: LockStripes,
    txns: TransactionCoordinator,
    notifier: Arc<ChangeNotifier>,
    snapshots: SnapshotManager,
    recovery: RecoveryManager,
    report: RecoveryReport,
    faults: FaultInjector,
    metrics: MetricsRegistry,
    next_context: AtomicU64,
    since_checkpoint: AtomicU64,
    checkpointing: Mutex<()>,
    closed: AtomicBool,
}

/// An open database. Share it across threads with `Arc`.
pub struct Database {
    inner: Arc<Inner>,
    maintenance: Mutex<Option<MaintenanceWorker>>,
}

impl Database {
    /// Open (or create) the database described by `config`, running
    /// recovery
    pub fn open(config: EngineConfig) -> DbResult<Self> {
        Self::open_with_faults(config, FaultInjector::new())
    }

    /// Open with a caller-supplied fault injector, so failures can be armed
    /// before or during recovery
    pub fn open_with_faults(config: EngineConfig, faults: FaultInjector) -> DbResult<Self> {
        config.validate()?;
        info!(
            event = Event::StartupBegin.as_str(),
            data_dir = %config.data_dir.display(),
            "opening database"
        );

        let cipher = PayloadCipher::from_config(&config.encryption)?;
        let recovery = RecoveryManager::new(&config.data_dir);
        let recovered = recovery.recover(&config, &cipher, &faults)?;

        let metrics = MetricsRegistry::new();
        metrics.add_replayed_entries(recovered.report.replayed_entries);
        let notifier = Arc::new(ChangeNotifier::new(recovered.wal.next_sequence()));
        let snapshots = SnapshotManager::new(config.snapshots_dir(), cipher, faults.clone());

        let inner = Arc::new(Inner {
            store: recovered.store,
            wal: Mutex::new(recovered.wal),
            commit_gate: RwLock::new(()),
            stripes: LockStripes::new(DEFAULT_STRIPES),
            txns: TransactionCoordinator::new(),
            notifier,
            snapshots,
            recovery,
            report: recovered.report,
            faults,
            metrics,
            next_context: AtomicU64::new(1),
            since_checkpoint: AtomicU64::new(0),
            checkpointing: Mutex::new(()),
            closed: AtomicBool::new(false),
            config,
        });

        // Replay may have left more dirty state than the budget allows
        inner.evict_if_needed();

        let maintenance = if inner.config.maintenance.enabled {
            Some(MaintenanceWorker::spawn(
                Arc::downgrade(&inner),
                inner.config.maintenance.interval(),
            )?)
        } else {
            None
        };

        info!(
            event = Event::StartupComplete.as_str(),
            next_sequence = inner.report.next_sequence,
            replayed = inner.report.replayed_entries,
            "database open"
        );

        Ok(Self {
            inner,
            maintenance: Mutex::new(maintenance),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// What recovery did when this instance was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.report
    }

    pub fn fault_injector(&self) -> &FaultInjector {
        &self.inner.faults
    }

    /// A fresh execution context for transactions
    pub fn new_context(&self) -> ContextId {
        ContextId::new(self.inner.next_context.fetch_add(1, Ordering::Relaxed))
    }

    // ==================
    // CRUD
    // ==================

    /// Create `id`. Fails with `DuplicateIdentifier` if it exists.
    pub fn create(&self, id: DocumentId, attributes: Attributes) -> DbResult<Arc<Document>> {
        let change = self.inner.write_single(StagedOp::Create { id, attributes })?;
        change.document.ok_or(DbError::NotFound(change.id))
    }

    /// Create a document in `collection` under a freshly generated id
    pub fn insert(&self, collection: &Collection, attributes: Attributes) -> DbResult<Arc<Document>> {
        self.create(DocumentId::generate(collection), attributes)
    }

    /// Current version of `id`. A miss is loaded from the segment store and
    /// promoted into the cache.
    pub fn get(&self, id: &DocumentId) -> DbResult<Arc<Document>> {
        self.inner.ensure_open()?;
        let result = QueryEngine::new(&self.inner.store).get_by_id(id);
        self.inner.evict_if_needed();
        result
    }

    /// Apply a shallow patch to `id`
    pub fn update(&self, id: &DocumentId, patch: Patch) -> DbResult<Arc<Document>> {
        let change = self.inner.write_single(StagedOp::Update {
            id: id.clone(),
            patch,
        })?;
        change.document.ok_or_else(|| DbError::NotFound(id.clone()))
    }

    /// Replace every attribute of `id`
    pub fn replace(&self, id: &DocumentId, attributes: Attributes) -> DbResult<Arc<Document>> {
        let change = self.inner.write_single(StagedOp::Replace {
            id: id.clone(),
            attributes,
        })?;
        change.document.ok_or_else(|| DbError::NotFound(id.clone()))
    }

    pub fn delete(&self, id: &DocumentId) -> DbResult<()> {
        self.inner.write_single(StagedOp::Delete { id: id.clone() })?;
        Ok(())
    }

    // ==================
    // Queries
    // ==================

    /// Every document of `collection`, ascending by id
    pub fn list(&self, collection: &Collection) -> DbResult<Vec<Arc<Document>>> {
        self.inner.ensure_open()?;
        QueryEngine::new(&self.inner.store).list(collection)
    }

    pub fn get_by_filter(&self, collection: &Collection, filter: &Filter) -> DbResult<Vec<Arc<Document>>> {
        self.inner.ensure_open()?;
        QueryEngine::new(&self.inner.store).get_by_filter(collection, filter)
    }

    /// Documents for `ids` in request order; misses are omitted
    pub fn get_by_ids(&self, ids: &[DocumentId]) -> DbResult<Vec<Arc<Document>>> {
        self.inner.ensure_open()?;
        let result = QueryEngine::new(&self.inner.store).get_by_ids(ids);
        self.inner.evict_if_needed();
        result
    }

    pub fn count(&self, collection: &Collection, filter: &Filter) -> DbResult<usize> {
        self.inner.ensure_open()?;
        QueryEngine::new(&self.inner.store).count(collection, filter)
    }

    /// `get` as seen by `context`, including its staged operations
    pub fn get_in(&self, context: ContextId, id: &DocumentId) -> DbResult<Arc<Document>> {
        let overlay = self.inner.overlay_for(context)?;
        QueryEngine::with_overlay(&self.inner.store, &overlay).get_by_id(id)
    }

    /// `get_by_ids` as seen by `context`
    pub fn get_by_ids_in(&self, context: ContextId, ids: &[DocumentId]) -> DbResult<Vec<Arc<Document>>> {
        let overlay = self.inner.overlay_for(context)?;
        QueryEngine::with_overlay(&self.inner.store, &overlay).get_by_ids(ids)
    }

    /// `get_by_filter` as seen by `context`
    pub fn get_by_filter_in(
        &self,
        context: ContextId,
        collection: &Collection,
        filter: &Filter,
    ) -> DbResult<Vec<Arc<Document>>> {
        let overlay = self.inner.overlay_for(context)?;
        QueryEngine::with_overlay(&self.inner.store, &overlay).get_by_filter(collection, filter)
    }

    // ==================
    // Transactions
    // ==================

    /// Open a transaction for `context`
    pub fn begin(&self, context: ContextId) -> DbResult<TxnId> {
        self.inner.ensure_open()?;
        self.inner.txns.begin(context)
    }

    pub fn stage(&self, txn: TxnId, op: StagedOp) -> DbResult<()> {
        self.inner.ensure_open()?;
        self.inner.txns.stage(txn, op)
    }

    pub fn stage_create(&self, txn: TxnId, id: DocumentId, attributes: Attributes) -> DbResult<()> {
        self.stage(txn, StagedOp::Create { id, attributes })
    }

    pub fn stage_update(&self, txn: TxnId, id: DocumentId, patch: Patch) -> DbResult<()> {
        self.stage(txn, StagedOp::Update { id, patch })
    }

    pub fn stage_replace(&self, txn: TxnId, id: DocumentId, attributes: Attributes) -> DbResult<()> {
        self.stage(txn, StagedOp::Replace { id, attributes })
    }

    pub fn stage_delete(&self, txn: TxnId, id: DocumentId) -> DbResult<()> {
        self.stage(txn, StagedOp::Delete { id })
    }

    /// Remove and return the last staged operation
    pub fn undo_last(&self, txn: TxnId) -> DbResult<StagedOp> {
        self.inner.ensure_open()?;
        self.inner.txns.undo_last(txn)
    }

    /// Discard `txn` without touching the WAL or the cache
    pub fn rollback(&self, txn: TxnId) -> DbResult<()> {
        self.inner.ensure_open()?;
        self.inner.txns.rollback(txn)?;
        self.inner.metrics.increment_rollbacks();
        Ok(())
    }

    /// Make `txn` durable and visible as one unit. Returns the sequence
    /// numbers assigned to its operations, in staging order.
    ///
    /// Any failure rolls the whole transaction back and is reported as
    /// `CommitFailure`; nothing of it is applied.
    pub fn commit(&self, txn: TxnId) -> DbResult<Vec<u64>> {
        self.inner.ensure_open()?;
        let ops = self.inner.txns.begin_commit(txn)?;
        if ops.is_empty() {
            self.inner.txns.finish(txn, TxnStatus::Committed);
            return Ok(Vec::new());
        }

        match self.inner.write_ops(Some(txn), &ops) {
            Ok(applied) => {
                self.inner.txns.finish(txn, TxnStatus::Committed);
                let sequences = applied.iter().map(|(seq, _)| *seq).collect();
                self.inner.after_write(applied);
                Ok(sequences)
            }
            Err(e) => {
                self.inner.txns.finish(txn, TxnStatus::RolledBack);
                self.inner.metrics.increment_rollbacks();
                self.inner.evict_if_needed();
                match e {
                    DbError::CommitFailure { .. } => Err(e),
                    other => Err(DbError::CommitFailure {
                        txn,
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    pub fn status(&self, txn: TxnId) -> DbResult<TxnStatus> {
        self.inner.txns.status(txn)
    }

    // ==================
    // Subscriptions
    // ==================

    /// Subscribe to changes matching `filter`. Documents that currently
    /// match are delivered first as `Current` events.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        connection: impl Into<String>,
        sender: EventSender,
    ) -> DbResult<SubscriptionHandle> {
        self.inner.ensure_open()?;
        let inner = &self.inner;
        inner
            .notifier
            .subscribe(filter, connection, sender, |filter| inner.current_state(filter))
    }

    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Drop every subscription owned by `connection`
    pub fn disconnect(&self, connection: &str) -> usize {
        self.inner.notifier.disconnect(connection)
    }

    // ==================
    // Maintenance
    // ==================

    /// Flush the cache, write a snapshot and retire covered WAL files
    pub fn checkpoint(&self) -> DbResult<CheckpointReport> {
        self.inner.ensure_open()?;
        self.inner.checkpoint()
    }

    /// Compact the segment store. Returns the bytes freed.
    pub fn compact(&self) -> DbResult<u64> {
        self.inner.ensure_open()?;
        self.inner.compact()
    }

    /// Run one eviction pass regardless of the budget check interval
    pub fn evict(&self) -> DbResult<EvictionReport> {
        self.inner.ensure_open()?;
        Ok(self.inner.evict_if_needed())
    }

    pub fn stats(&self) -> DatabaseStats {
        let wal = {
            let wal = lock(&self.inner.wal);
            WalStats {
                next_sequence: wal.next_sequence(),
                durable_sequence: wal.durable_sequence(),
                files: wal.file_count(),
                total_bytes: wal.total_bytes(),
            }
        };
        DatabaseStats {
            cache: self.inner.store.cache().stats(),
            segments: self.inner.store.segments().stats(),
            wal,
            metrics: self.inner.metrics.snapshot(),
            open_transactions: self.inner.txns.open_count(),
            subscriptions: self.inner.notifier.subscription_count(),
        }
    }

    /// Stop maintenance, flush every dirty entry, sync the WAL and write the
    /// clean-shutdown marker. Later calls fail with `Closed`.
    ///
    /// If flushing fails the handle stays open (without its maintenance
    /// worker) and shutdown may be retried.
    pub fn shutdown(&self) -> DbResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        info!(event = Event::ShutdownStart.as_str(), "shutting down");

        if let Some(mut worker) = lock(&self.maintenance).take() {
            worker.stop();
        }

        match self.inner.flush_for_shutdown() {
            Ok(flushed) => {
                info!(
                    event = Event::ShutdownComplete.as_str(),
                    flushed,
                    "shutdown complete"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.closed.store(false, Ordering::SeqCst);
                error!(error = %e, "shutdown failed; database left open");
                Err(e)
            }
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Without shutdown() this is the crash path: nothing is flushed
        if let Some(mut worker) = lock(&self.maintenance).take() {
            worker.stop();
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> DbResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        Ok(())
    }

    /// Make everything durable in the segment store and mark the shutdown
    /// clean. Returns the number of entries flushed.
    fn flush_for_shutdown(&self) -> DbResult<usize> {
        let _gate = write(&self.commit_gate);
        let flushed = self.store.flush_dirty(|seq| self.sync_wal_through(seq))?;
        self.metrics.add_segment_flushes(flushed as u64);
        self.store.segments().sync()?;
        lock(&self.wal).sync()?;
        self.recovery.mark_clean_shutdown()?;
        Ok(flushed)
    }

    fn sync_wal_through(&self, sequence: u64) -> DbResult<()> {
        lock(&self.wal).sync_through(sequence)?;
        Ok(())
    }

    /// Staged operations of `context`'s open transaction, resolved leniently
    fn overlay_for(&self, context: ContextId) -> DbResult<Overlay> {
        self.ensure_open()?;
        let staged = self.txns.staged_for(context);
        Overlay::from_staged(&staged, |id| self.store.resolve(id))
    }

    /// Auto-committed single operation
    fn write_single(&self, op: StagedOp) -> DbResult<ResolvedChange> {
        self.ensure_open()?;
        let applied = match self.write_ops(None, std::slice::from_ref(&op)) {
            Ok(applied) => applied,
            Err(e) => {
                // Resolving the target may have promoted it
                self.evict_if_needed();
                return Err(e);
            }
        };
        let change = applied
            .first()
            .map(|(_, change)| change.clone())
            .ok_or_else(|| DbError::IoFailure("write produced no change".into()))?;
        self.after_write(applied);
        Ok(change)
    }

    /// Resolve, log and apply `ops` as one batch. Returns each change with
    /// its sequence number. Events are not yet published.
    fn write_ops(&self, txn: Option<TxnId>, ops: &[StagedOp]) -> DbResult<Vec<(u64, ResolvedChange)>> {
        let _stripes = self.stripes.lock_all(ops.iter().map(|op| op.target()));

        let mut overlay = Overlay::new();
        let mut base = |id: &DocumentId| self.store.resolve(id);
        let changes = ops
            .iter()
            .map(|op| overlay.apply(op, &mut base))
            .collect::<DbResult<Vec<_>>>()?;
        let pending = changes.iter().map(ResolvedChange::to_pending).collect();

        let _gate = read(&self.commit_gate);
        let appended = lock(&self.wal).append_batch(txn, pending);
        let sequences = match appended {
            Ok(sequences) => sequences,
            Err(e) => {
                self.metrics.increment_commit_failures();
                error!(
                    event = Event::CommitFailed.as_str(),
                    txn = txn.unwrap_or(0),
                    entries = changes.len(),
                    error = %e,
                    "WAL batch write failed; nothing applied"
                );
                return Err(match txn {
                    Some(txn) => DbError::CommitFailure {
                        txn,
                        reason: e.to_string(),
                    },
                    None => e.into(),
                });
            }
        };

        let applied: Vec<(u64, ResolvedChange)> = sequences.into_iter().zip(changes).collect();
        for (sequence, change) in &applied {
            self.store
                .apply(change.id.clone(), change.document.clone(), *sequence);
        }
        self.metrics.add_wal_entries(applied.len() as u64);
        self.metrics.increment_commits();
        self.since_checkpoint
            .fetch_add(applied.len() as u64, Ordering::Relaxed);
        Ok(applied)
    }

    /// Publish the events of an applied write and keep the cache in budget
    fn after_write(&self, applied: Vec<(u64, ResolvedChange)>) {
        let events = applied
            .iter()
            .map(|(seq, change)| ChangeEvent::from_change(*seq, change))
            .collect();
        let outcome = self.notifier.publish(events);
        self.metrics.add_events_published(outcome.released as u64);
        self.metrics.add_subscriptions_dropped(outcome.dropped as u64);
        self.evict_if_needed();
    }

    fn evict_if_needed(&self) -> EvictionReport {
        let cache = self.store.cache();
        if !cache.over_budget() {
            return EvictionReport {
                resident_bytes: cache.resident_bytes(),
                ..Default::default()
            };
        }
        let report = self.store.evict(|seq| self.sync_wal_through(seq));
        self.metrics.add_segment_flushes(report.flushed as u64);
        self.metrics.add_flush_failures(report.flush_failures as u64);
        report
    }

    /// Matching documents plus the WAL cut they reflect. The gate's write
    /// side waits out every in-flight append-and-apply, so each change at
    /// or below the cut is in the returned state and none above it is.
    fn current_state(&self, filter: &SubscriptionFilter) -> DbResult<CurrentState> {
        let _gate = write(&self.commit_gate);
        let through_sequence = lock(&self.wal).last_sequence();
        let docs = match &filter.target {
            SubscriptionTarget::Collection(collection) => {
                self.store.collection_documents(collection)?
            }
            SubscriptionTarget::Document(id) => self.store.resolve(id)?.into_iter().collect(),
        };
        let documents = docs
            .into_iter()
            .filter_map(|doc| {
                let sequence = self.store.sequence_of(doc.id())?;
                Some((doc, sequence))
            })
            .collect();
        Ok(CurrentState {
            documents,
            through_sequence,
        })
    }

    fn compact(&self) -> DbResult<u64> {
        match self.store.segments().compact() {
            Ok(freed) => {
                self.metrics.record_compaction(freed);
                Ok(freed)
            }
            Err(e) => {
                error!(event = Event::CompactionFailed.as_str(), error = %e, "compaction failed");
                Err(e.into())
            }
        }
    }

    /// One maintenance cycle. Failures are logged and retried next cycle.
    pub(crate) fn run_maintenance(&self) {
        if self.ensure_open().is_err() {
            return;
        }

        if let Err(e) = lock(&self.wal).sync_if_due() {
            warn!(error = %e, "scheduled WAL fsync failed");
        }

        self.evict_if_needed();

        let segment = &self.config.segment;
        if self
            .store
            .segments()
            .should_compact(segment.compaction_garbage_ratio, segment.compaction_min_bytes)
        {
            let _ = self.compact();
        }

        let interval = self.config.snapshot.interval_entries;
        if interval > 0 && self.since_checkpoint.load(Ordering::Relaxed) >= interval {
            // Failure is logged and counted inside checkpoint()
            let _ = self.checkpoint();
        }
    }
}
