//! Recovery
//!
//! Rebuilds the engine's state at open: segments (or a snapshot when they
//! are damaged), then WAL replay into the cache. The WAL is the source of
//! truth; recovery never trusts a segment version newer than the log can
//! account for, and halts on corruption anywhere but a torn tail.

mod replay;
mod startup;

pub use replay::{ReplayStats, ReplayTarget, WalReplayer};
pub use startup::{Recovered, RecoveryManager, RecoveryReport, CLEAN_SHUTDOWN_MARKER};
