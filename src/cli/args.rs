//! CLI argument definitions using clap
//!
//! Commands:
//! - tierdb init --data-dir <path>
//! - tierdb stats --config <path>
//! - tierdb verify --config <path>
//! - tierdb compact --config <path>
//! - tierdb checkpoint --config <path>
//! - tierdb dump-wal --config <path> [--from <seq>]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// tierdb - offline inspection and maintenance of a data directory
#[derive(Parser, Debug)]
#[command(name = "tierdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the engine configuration comes from
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Path to a JSON configuration file
    #[arg(long, conflicts_with = "data_dir")]
    pub config: Option<PathBuf>,

    /// Data directory, opened with default settings
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a data directory and write a default configuration file
    Init {
        /// Data directory to create
        #[arg(long)]
        data_dir: PathBuf,

        /// Where to write the configuration (default: <data-dir>/tierdb.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print cache, segment, WAL and recovery statistics
    Stats {
        #[command(flatten)]
        target: Target,
    },

    /// Check every segment record, WAL entry and snapshot without modifying
    /// the WAL
    Verify {
        #[command(flatten)]
        target: Target,
    },

    /// Rewrite the segment store without dead records
    Compact {
        #[command(flatten)]
        target: Target,
    },

    /// Flush, snapshot and retire covered WAL files
    Checkpoint {
        #[command(flatten)]
        target: Target,
    },

    /// Print WAL entries as JSON lines
    DumpWal {
        #[command(flatten)]
        target: Target,

        /// First sequence to print
        #[arg(long, default_value_t = 1)]
        from: u64,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_wal_from_flag() {
        let cli = Cli::try_parse_from(["tierdb", "dump-wal", "--data-dir", "/tmp/x", "--from", "7"])
            .unwrap();
        match cli.command {
            Command::DumpWal { target, from } => {
                assert_eq!(from, 7);
                assert_eq!(target.data_dir, Some(PathBuf::from("/tmp/x")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_and_data_dir_conflict() {
        let parsed = Cli::try_parse_from([
            "tierdb", "stats", "--config", "a.json", "--data-dir", "/tmp/x",
        ]);
        assert!(parsed.is_err());
    }
}
