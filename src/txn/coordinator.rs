//! Transaction coordinator
//!
//! Tracks open transactions and their staged operations. Knows nothing about
//! the WAL or the cache: the engine takes a transaction out for commit with
//! `begin_commit` and reports the outcome with `finish`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::errors::{DbError, DbResult};
use crate::sync::lock;

use super::transaction::{ContextId, StagedOp, Transaction, TxnId, TxnStatus};

/// Terminal statuses kept for `status()` queries
pub const FINISHED_HISTORY: usize = 1024;

#[derive(Debug)]
struct CoordinatorState {
    next_id: TxnId,
    open: HashMap<TxnId, Transaction>,
    by_context: HashMap<ContextId, TxnId>,
    finished: HashMap<TxnId, TxnStatus>,
    finished_order: VecDeque<TxnId>,
}

impl CoordinatorState {
    fn open_mut(&mut self, txn: TxnId) -> DbResult<&mut Transaction> {
        if let Some(status) = self.finished.get(&txn) {
            return Err(DbError::TransactionClosed {
                txn,
                status: *status,
            });
        }
        match self.open.get_mut(&txn) {
            Some(t) if t.status == TxnStatus::Open => Ok(t),
            Some(t) => Err(DbError::TransactionClosed {
                txn,
                status: t.status,
            }),
            None => Err(DbError::UnknownTransaction(txn)),
        }
    }

    fn record_finished(&mut self, txn: TxnId, status: TxnStatus) {
        self.finished.insert(txn, status);
        self.finished_order.push_back(txn);
        while self.finished_order.len() > FINISHED_HISTORY {
            if let Some(old) = self.finished_order.pop_front() {
                self.finished.remove(&old);
            }
        }
    }
}

/// Issues transaction ids and buffers staged operations per context
#[derive(Debug)]
pub struct TransactionCoordinator {
    state: Mutex<CoordinatorState>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                next_id: 1,
                open: HashMap::new(),
                by_context: HashMap::new(),
                finished: HashMap::new(),
                finished_order: VecDeque::new(),
            }),
        }
    }

    /// Open a transaction for `context`
    pub fn begin(&self, context: ContextId) -> DbResult<TxnId> {
        let mut state = lock(&self.state);
        if let Some(open) = state.by_context.get(&context) {
            return Err(DbError::TransactionAlreadyOpen {
                context,
                open: *open,
            });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.open.insert(id, Transaction::new(id, context));
        state.by_context.insert(context, id);
        Ok(id)
    }

    /// Append an operation to an open transaction
    pub fn stage(&self, txn: TxnId, op: StagedOp) -> DbResult<()> {
        let mut state = lock(&self.state);
        state.open_mut(txn)?.ops.push(op);
        Ok(())
    }

    /// Remove and return the last staged operation
    pub fn undo_last(&self, txn: TxnId) -> DbResult<StagedOp> {
        let mut state = lock(&self.state);
        state
            .open_mut(txn)?
            .ops
            .pop()
            .ok_or(DbError::NothingToUndo(txn))
    }

    /// Discard an open transaction
    pub fn rollback(&self, txn: TxnId) -> DbResult<()> {
        let mut state = lock(&self.state);
        let context = state.open_mut(txn)?.context;
        state.open.remove(&txn);
        state.by_context.remove(&context);
        state.record_finished(txn, TxnStatus::RolledBack);
        Ok(())
    }

    /// Move an open transaction to `Committing` and hand out its operations.
    /// The caller must follow up with `finish`.
    pub fn begin_commit(&self, txn: TxnId) -> DbResult<Vec<StagedOp>> {
        let mut state = lock(&self.state);
        let transaction = state.open_mut(txn)?;
        transaction.status = TxnStatus::Committing;
        Ok(transaction.ops.clone())
    }

    /// Record the outcome of a commit started with `begin_commit`
    pub fn finish(&self, txn: TxnId, status: TxnStatus) {
        let mut state = lock(&self.state);
        if let Some(transaction) = state.open.remove(&txn) {
            state.by_context.remove(&transaction.context);
            state.record_finished(txn, status);
        }
    }

    pub fn status(&self, txn: TxnId) -> DbResult<TxnStatus> {
        let state = lock(&self.state);
        if let Some(t) = state.open.get(&txn) {
            return Ok(t.status);
        }
        state
            .finished
            .get(&txn)
            .copied()
            .ok_or(DbError::UnknownTransaction(txn))
    }

    /// The open transaction of `context`, if any
    pub fn open_for(&self, context: ContextId) -> Option<TxnId> {
        lock(&self.state).by_context.get(&context).copied()
    }

    /// Operations staged so far by `context`'s open transaction
    pub fn staged_for(&self, context: ContextId) -> Vec<StagedOp> {
        let state = lock(&self.state);
        state
            .by_context
            .get(&context)
            .and_then(|txn| state.open.get(txn))
            .map(|t| t.ops.clone())
            .unwrap_or_default()
    }

    /// Number of transactions not yet finished
    pub fn open_count(&self) -> usize {
        lock(&self.state).open.len()
    }
}
