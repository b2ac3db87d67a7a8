//! CLI command implementations
//!
//! Every command except `verify` and `dump-wal` opens the database through
//! the normal startup path (recovery included) with the maintenance thread
//! disabled, and shuts it down cleanly before returning.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

use crate::config::EngineConfig;
use crate::crypto::PayloadCipher;
use crate::engine::Database;
use crate::errors::DbError;
use crate::fault::FaultInjector;
use crate::observability::{self, Event};
use crate::segment::{SegmentOptions, SegmentStore};
use crate::snapshot::SnapshotManager;
use crate::wal::{WalEntry, WalReader};

use super::args::{Cli, Command, Target};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_json, write_response};

/// Default configuration file name inside a data directory
pub const CONFIG_FILE: &str = "tierdb.json";

/// Parse arguments, install logging and run the command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    observability::init_logging(cli.log_json);
    let result = run_command(cli.command);
    if let Err(e) = &result {
        write_error(e.code_str(), e.message())?;
    }
    result
}

/// Dispatch one parsed command
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { data_dir, config } => write_response(init(&data_dir, config)?),
        Command::Stats { target } => write_response(stats(&target.resolve()?)?),
        Command::Verify { target } => write_response(verify(&target.resolve()?)?),
        Command::Compact { target } => write_response(compact(&target.resolve()?)?),
        Command::Checkpoint { target } => write_response(checkpoint(&target.resolve()?)?),
        Command::DumpWal { target, from } => dump_wal(&target.resolve()?, from),
    }
}

impl Target {
    /// Load the configuration file, or default settings for `--data-dir`
    pub fn resolve(&self) -> CliResult<EngineConfig> {
        match (&self.config, &self.data_dir) {
            (Some(path), _) => {
                let config = EngineConfig::load(path)?;
                info!(
                    event = Event::ConfigLoaded.as_str(),
                    path = %path.display(),
                    "configuration loaded"
                );
                Ok(config)
            }
            (None, Some(dir)) => {
                let path = dir.join(CONFIG_FILE);
                if path.exists() {
                    Ok(EngineConfig::load(&path)?)
                } else {
                    Ok(EngineConfig::new(dir))
                }
            }
            (None, None) => Err(CliError::config_error(
                "either --config or --data-dir is required",
            )),
        }
    }
}

fn open(config: &EngineConfig) -> CliResult<Database> {
    let mut config = config.clone();
    config.maintenance.enabled = false;
    Ok(Database::open(config)?)
}

/// Create the directory layout and write a default configuration
pub fn init(data_dir: &Path, config_path: Option<PathBuf>) -> CliResult<Value> {
    let config_path = config_path.unwrap_or_else(|| data_dir.join(CONFIG_FILE));
    if config_path.exists() {
        return Err(CliError::already_initialized(&config_path));
    }

    let config = EngineConfig::new(data_dir);
    let db = open(&config)?;
    db.shutdown()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    Ok(json!({
        "data_dir": data_dir.display().to_string(),
        "config": config_path.display().to_string(),
    }))
}

pub fn stats(config: &EngineConfig) -> CliResult<Value> {
    let db = open(config)?;
    let value = json!({
        "stats": db.stats(),
        "recovery": db.recovery_report(),
    });
    db.shutdown()?;
    Ok(value)
}

pub fn compact(config: &EngineConfig) -> CliResult<Value> {
    let db = open(config)?;
    // Flush first so compaction sees every committed version
    db.checkpoint()?;
    let freed = db.compact()?;
    let segments = db.stats().segments;
    db.shutdown()?;
    Ok(json!({ "bytes_freed": freed, "segments": segments }))
}

pub fn checkpoint(config: &EngineConfig) -> CliResult<Value> {
    let db = open(config)?;
    let report = db.checkpoint()?;
    db.shutdown()?;
    Ok(serde_json::to_value(report)?)
}

/// Read every segment record, WAL entry and snapshot. Collects problems
/// instead of stopping at the first one.
pub fn verify(config: &EngineConfig) -> CliResult<Value> {
    let cipher = PayloadCipher::from_config(&config.encryption)?;
    let faults = FaultInjector::new();
    let mut problems: Vec<String> = Vec::new();

    let options = SegmentOptions {
        max_segment_bytes: config.segment.max_segment_bytes,
        cipher: cipher.clone(),
        faults: faults.clone(),
    };
    let segment_records = match SegmentStore::open(&config.segments_dir(), options) {
        Ok((store, _)) => match store.verify() {
            Ok(count) => Some(count),
            Err(e) => {
                problems.push(format!("segments: {}", e));
                None
            }
        },
        Err(e) => {
            problems.push(format!("segments: {}", e));
            None
        }
    };

    let wal_entries = match WalReader::new(&config.wal_dir(), cipher.clone()).read_all() {
        Ok(entries) => Some(entries.len()),
        Err(e) => {
            problems.push(format!("wal: {}", e));
            None
        }
    };

    let snapshots = SnapshotManager::new(config.snapshots_dir(), cipher, faults);
    let mut verified_snapshots = Vec::new();
    match snapshots.list() {
        Ok(list) => {
            for info in list {
                match snapshots.load(&info) {
                    Ok((manifest, _)) => verified_snapshots.push(manifest.sequence),
                    Err(e) => problems.push(format!("snapshot {}: {}", info.sequence, e)),
                }
            }
        }
        Err(e) => problems.push(format!("snapshots: {}", e)),
    }

    if !problems.is_empty() {
        write_json(&json!({ "problems": problems }))?;
        return Err(CliError::verify_failed(problems.len()));
    }

    Ok(json!({
        "segment_records": segment_records,
        "wal_entries": wal_entries,
        "snapshots": verified_snapshots,
    }))
}

/// Print entries from `from` onward, one per line
pub fn dump_wal(config: &EngineConfig, from: u64) -> CliResult<()> {
    let cipher = PayloadCipher::from_config(&config.encryption)?;
    let reader = WalReader::new(&config.wal_dir(), cipher);
    let replay = reader.replay(from).map_err(DbError::from)?;
    for entry in replay {
        let entry = entry.map_err(DbError::from)?;
        write_json(&entry_json(&entry))?;
    }
    Ok(())
}

fn entry_json(entry: &WalEntry) -> Value {
    json!({
        "sequence": entry.sequence,
        "txn_id": entry.txn_id,
        "batch_len": entry.batch_len,
        "kind": entry.kind,
        "target": entry.target.as_str(),
        "payload": entry.payload,
    })
}
