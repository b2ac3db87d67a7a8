//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default so an empty object
//! (`{}`) plus a `data_dir` is a valid configuration.
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/tierdb",
//!   "wal": { "durability": { "mode": "batched", "max_entries": 64, "interval_ms": 10 } },
//!   "cache": { "max_memory_mb": 256, "memory_target_percent": 80 },
//!   "encryption": { "enabled": true, "secret_env": "TIERDB_SECRET" }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DbError, DbResult};

/// When appended WAL entries are fsynced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DurabilityPolicy {
    /// fsync before every append/batch returns
    Immediate,
    /// fsync once `max_entries` entries are pending or `interval_ms` has
    /// elapsed since the last fsync. Entries inside that window may be lost
    /// at crash.
    Batched { max_entries: usize, interval_ms: u64 },
}

impl Default for DurabilityPolicy {
    fn default() -> Self {
        DurabilityPolicy::Immediate
    }
}

impl DurabilityPolicy {
    pub fn is_immediate(&self) -> bool {
        matches!(self, DurabilityPolicy::Immediate)
    }
}

/// Write-ahead log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    #[serde(default)]
    pub durability: DurabilityPolicy,

    /// Size at which the active WAL file is rotated (default 64MB)
    #[serde(default = "default_wal_segment_bytes")]
    pub max_segment_bytes: u64,
}

/// Hot tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory budget in megabytes (default 256)
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    /// Exact budget in bytes. Takes precedence over `max_memory_mb`.
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,

    /// Eviction stops once resident size is below this share of the budget
    #[serde(default = "default_memory_target_percent")]
    pub memory_target_percent: u8,
}

/// Cold tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Size at which the active segment file is sealed (default 128MB)
    #[serde(default = "default_segment_bytes")]
    pub max_segment_bytes: u64,

    /// Garbage share that triggers opportunistic compaction
    #[serde(default = "default_garbage_ratio")]
    pub compaction_garbage_ratio: f64,

    /// Segments smaller than this in total are never compacted
    #[serde(default = "default_compaction_min_bytes")]
    pub compaction_min_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Number of snapshots kept on disk
    #[serde(default = "default_retain")]
    pub retain: usize,

    /// Committed entries between automatic checkpoints. 0 disables them.
    #[serde(default = "default_interval_entries")]
    pub interval_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Whether the background maintenance thread runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_maintenance_interval_ms")]
    pub interval_ms: u64,
}

/// Payload encryption. The secret is taken from `secret` or, when unset,
/// from the environment variable named by `secret_env`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub secret_env: Option<String>,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("enabled", &self.enabled)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_env", &self.secret_env)
            .finish()
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory (required)
    pub data_dir: PathBuf,

    #[serde(default)]
    pub wal: WalConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub encryption: EncryptionConfig,
}

fn default_wal_segment_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_max_memory_mb() -> u64 {
    256
}
fn default_memory_target_percent() -> u8 {
    80
}
fn default_segment_bytes() -> u64 {
    128 * 1024 * 1024
}
fn default_garbage_ratio() -> f64 {
    0.5
}
fn default_compaction_min_bytes() -> u64 {
    1024 * 1024
}
fn default_retain() -> usize {
    2
}
fn default_interval_entries() -> u64 {
    100_000
}
fn default_true() -> bool {
    true
}
fn default_maintenance_interval_ms() -> u64 {
    1000
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityPolicy::default(),
            max_segment_bytes: default_wal_segment_bytes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            max_memory_bytes: None,
            memory_target_percent: default_memory_target_percent(),
        }
    }
}

impl CacheConfig {
    /// Budget in bytes
    pub fn budget_bytes(&self) -> u64 {
        self.max_memory_bytes
            .unwrap_or(self.max_memory_mb.saturating_mul(1024 * 1024))
    }

    /// Resident size eviction drives down to
    pub fn target_bytes(&self) -> u64 {
        self.budget_bytes() / 100 * self.memory_target_percent as u64
            + self.budget_bytes() % 100 * self.memory_target_percent as u64 / 100
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: default_segment_bytes(),
            compaction_garbage_ratio: default_garbage_ratio(),
            compaction_min_bytes: default_compaction_min_bytes(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retain: default_retain(),
            interval_entries: default_interval_entries(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_maintenance_interval_ms(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl EncryptionConfig {
    /// Resolve the secret, reading the environment when configured so
    pub fn resolve_secret(&self) -> DbResult<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        if let Some(secret) = &self.secret {
            return Ok(Some(secret.clone()));
        }
        if let Some(var) = &self.secret_env {
            return std::env::var(var).map(Some).map_err(|_| {
                DbError::InvalidConfig(format!("encryption secret variable '{}' is not set", var))
            });
        }
        Err(DbError::InvalidConfig(
            "encryption is enabled but neither secret nor secret_env is set".into(),
        ))
    }
}

impl EngineConfig {
    /// Default configuration rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            wal: WalConfig::default(),
            cache: CacheConfig::default(),
            segment: SegmentConfig::default(),
            snapshot: SnapshotConfig::default(),
            maintenance: MaintenanceConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }

    /// Load configuration from a JSON file and validate it
    pub fn load(path: &Path) -> DbResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DbError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| DbError::InvalidConfig(format!("invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> DbResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(DbError::InvalidConfig("data_dir must be set".into()));
        }
        if self.wal.max_segment_bytes == 0 {
            return Err(DbError::InvalidConfig("wal.max_segment_bytes must be > 0".into()));
        }
        if let DurabilityPolicy::Batched {
            max_entries,
            interval_ms,
        } = self.wal.durability
        {
            if max_entries == 0 {
                return Err(DbError::InvalidConfig(
                    "wal.durability.max_entries must be > 0".into(),
                ));
            }
            if interval_ms == 0 {
                return Err(DbError::InvalidConfig(
                    "wal.durability.interval_ms must be > 0".into(),
                ));
            }
        }
        if self.cache.budget_bytes() == 0 {
            return Err(DbError::InvalidConfig("cache budget must be > 0".into()));
        }
        if self.cache.memory_target_percent == 0 || self.cache.memory_target_percent > 100 {
            return Err(DbError::InvalidConfig(
                "cache.memory_target_percent must be within 1..=100".into(),
            ));
        }
        if self.segment.max_segment_bytes == 0 {
            return Err(DbError::InvalidConfig(
                "segment.max_segment_bytes must be > 0".into(),
            ));
        }
        let ratio = self.segment.compaction_garbage_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(DbError::InvalidConfig(
                "segment.compaction_garbage_ratio must be within (0, 1]".into(),
            ));
        }
        if self.snapshot.retain == 0 {
            return Err(DbError::InvalidConfig("snapshot.retain must be >= 1".into()));
        }
        if self.maintenance.enabled && self.maintenance.interval_ms == 0 {
            return Err(DbError::InvalidConfig(
                "maintenance.interval_ms must be > 0".into(),
            ));
        }
        self.encryption.resolve_secret()?;
        Ok(())
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.data_dir.join("segments")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}
