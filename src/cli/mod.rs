//! Admin CLI for tierdb data directories
//!
//! Provides:
//! - init: create a data directory and default configuration
//! - stats: engine and recovery statistics
//! - verify: integrity check of segments, WAL and snapshots
//! - compact / checkpoint: maintenance on demand
//! - dump-wal: WAL entries as JSON lines

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Target};
pub use commands::{checkpoint, compact, dump_wal, init, run, run_command, stats, verify, CONFIG_FILE};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_json, write_response};
