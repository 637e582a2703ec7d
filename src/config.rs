//! Configuration for kvsns
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a kvsns instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // KV Substrate Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the KV substrate files, `None` for a volatile store.
    /// Internal structure:
    ///   {kv_dir}/
    ///     ├── wal.log          (write-ahead log of committed batches)
    ///     └── snapshot.kvs     (checksummed full snapshot)
    pub kv_dir: Option<PathBuf>,

    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// WAL size (in bytes) above which the store writes a snapshot
    pub snapshot_threshold: u64,

    // -------------------------------------------------------------------------
    // Data Backend Configuration
    // -------------------------------------------------------------------------
    /// The one backend bound at startup
    pub backend: BackendConfig,

    /// Retry policy for whole-block writes
    pub io_retry: IoRetryPolicy,

    /// Chunk size used by bulk copy in/out
    pub copy_io_size: usize,

    // -------------------------------------------------------------------------
    // Namespace Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the per-entry open owner list
    pub max_open_owners: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Selects and configures the data backend
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Single-tier local directory, one file per entry
    Posix { root: PathBuf },

    /// Local fast tier backed by an archive tier (pseudo-HSM)
    Tiered {
        cache_dir: PathBuf,
        archive: ArchiveConfig,
    },

    /// Whole-block device, one sparse file per entry
    Block { root: PathBuf, block_size: u64 },
}

/// Selects the archive tier of a tiered backend
#[derive(Debug, Clone)]
pub enum ArchiveConfig {
    /// Archive objects are plain files in a directory
    Directory { root: PathBuf },

    /// Archive objects are moved by external commands.
    ///
    /// `{path}` and `{objid}` are substituted in every argument.
    Command {
        put: Vec<String>,
        get: Vec<String>,
        delete: Vec<String>,
    },
}

/// Bounded retry for transient block write failures
#[derive(Debug, Clone, Copy)]
pub struct IoRetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl Default for IoRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(100),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kv_dir: None,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            snapshot_threshold: 16 * 1024 * 1024, // 16 MB
            backend: BackendConfig::Posix {
                root: PathBuf::from("./kvsns_data"),
            },
            io_retry: IoRetryPolicy::default(),
            copy_io_size: 1024 * 1024, // 1 MB
            max_open_owners: 128,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Persist the KV substrate under this directory
    pub fn kv_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kv_dir = Some(path.into());
        self
    }

    /// Keep the KV substrate in memory only
    pub fn volatile_kv(mut self) -> Self {
        self.config.kv_dir = None;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers a snapshot (in bytes)
    pub fn snapshot_threshold(mut self, bytes: u64) -> Self {
        self.config.snapshot_threshold = bytes;
        self
    }

    /// Select the data backend
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the retry policy for block writes
    pub fn io_retry(mut self, policy: IoRetryPolicy) -> Self {
        self.config.io_retry = policy;
        self
    }

    /// Set the bulk copy chunk size (in bytes)
    pub fn copy_io_size(mut self, size: usize) -> Self {
        self.config.copy_io_size = size;
        self
    }

    /// Set the open owner list capacity
    pub fn max_open_owners(mut self, count: usize) -> Self {
        self.config.max_open_owners = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
