//! tierdb - an embedded document database
//!
//! Durable writes go to a write-ahead log first, then to a byte-budgeted LRU
//! cache (hot tier) that flushes to append-only segment files (cold tier).
//! Transactions are buffered per execution context and committed as one WAL
//! batch; subscribers receive change events in sequence order.
//!
//! ```ignore
//! let db = Database::open(EngineConfig::new("./data"))?;
//! let user = DocumentId::parse("USER_1")?;
//! db.create(user.clone(), attrs)?;
//! db.update(&user, Patch::new().set("name", "Bob"))?;
//! db.shutdown()?;
//! ```

pub mod cache;
pub mod cli;
mod codec;
pub mod config;
pub mod crypto;
pub mod document;
pub mod engine;
pub mod errors;
pub mod fault;
pub mod notify;
pub mod observability;
pub mod query;
pub mod recovery;
pub mod segment;
pub mod snapshot;
mod sync;
pub mod txn;
pub mod wal;

pub use config::{DurabilityPolicy, EngineConfig};
pub use document::{Attributes, Collection, Document, DocumentId, Patch};
pub use engine::{CheckpointReport, Database, DatabaseStats};
pub use errors::{DbError, DbResult};
pub use notify::{ChangeEvent, ChangeKind, SubscriptionFilter, SubscriptionHandle};
pub use query::Filter;
pub use txn::{ContextId, StagedOp, TxnId, TxnStatus};
