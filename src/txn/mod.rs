//! Transactions
//!
//! A transaction buffers operations per execution context. Nothing is
//! written until commit, which the engine turns into one WAL batch.

mod coordinator;
mod overlay;
mod transaction;

pub use coordinator::{TransactionCoordinator, FINISHED_HISTORY};
pub use overlay::{Overlay, ResolvedChange};
pub use transaction::{ContextId, StagedOp, Transaction, TxnId, TxnStatus};
