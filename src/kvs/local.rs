//! Local KV store
//!
//! In-process implementation of the `KvStore` contract: a memtable holding
//! the whole key space, optionally made durable by a WAL and snapshots.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::{Config, WalSyncStrategy};
use crate::error::{KvsnsError, Result};
use crate::wal::{Operation, WalRecovery, WalWriter};

use super::{memtable::MemTable, snapshot, KvStore, ScanPage, WriteBatch};

/// Durable state of a persistent store
struct Durability {
    /// Directory holding WAL and snapshot
    dir: PathBuf,

    /// Write-ahead log (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// WAL size that triggers a snapshot
    snapshot_threshold: u64,
}

/// The in-process KV substrate
///
/// ## Concurrency Model
///
/// - **Writes** (set/delete/incr/apply): serialized by `write_lock`, so WAL
///   order always equals memtable order
/// - **Reads**: concurrent, through the memtable's internal RwLock
/// - **Transactions**: serialized by `txn_lock` (see `Transaction`)
pub struct LocalKvStore {
    /// Live key space
    memtable: MemTable,

    /// `None` for a volatile store
    durability: Option<Durability>,

    /// Serializes write operations
    write_lock: Mutex<()>,

    /// Serializes transactions
    txn_lock: Mutex<()>,
}

impl LocalKvStore {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SNAPSHOT_FILENAME: &'static str = "snapshot.kvs";

    /// Create a volatile store
    pub fn in_memory() -> Self {
        Self {
            memtable: MemTable::new(),
            durability: None,
            write_lock: Mutex::new(()),
            txn_lock: Mutex::new(()),
        }
    }

    /// Open the store described by `config`
    ///
    /// Without `kv_dir` the store is volatile.
    pub fn open(config: &Config) -> Result<Self> {
        match &config.kv_dir {
            Some(dir) => Self::open_dir(dir, config.wal_sync_strategy, config.snapshot_threshold),
            None => Ok(Self::in_memory()),
        }
    }

    /// Open or create a durable store in `dir`
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Load the snapshot, if any
    /// 3. Replay WAL records newer than the snapshot
    /// 4. Fold recovered records into a fresh snapshot and truncate the WAL
    pub fn open_dir(
        dir: &Path,
        sync_strategy: WalSyncStrategy,
        snapshot_threshold: u64,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let snapshot_path = dir.join(Self::SNAPSHOT_FILENAME);
        let wal_path = dir.join(Self::WAL_FILENAME);
        let memtable = MemTable::new();

        // Step 1: Snapshot
        let mut last_lsn = 0;
        if snapshot_path.exists() {
            let snap = snapshot::load(&snapshot_path)?;
            last_lsn = snap.last_lsn;
            for (key, value) in snap.entries {
                memtable.put(key, value);
            }
            tracing::info!(
                "Loaded snapshot: {} keys, last_lsn={}",
                memtable.entry_count(),
                last_lsn
            );
        }

        // Step 2: WAL replay
        let mut replayed = 0u64;
        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            if result.entries_recovered > 0 || result.entries_corrupted > 0 {
                tracing::info!(
                    "WAL recovery: {} records recovered, {} corrupted, last_lsn={}",
                    result.entries_recovered,
                    result.entries_corrupted,
                    result.last_lsn
                );
            }

            let snapshot_lsn = last_lsn;
            for entry in entries.into_iter().filter(|e| e.lsn > snapshot_lsn) {
                memtable.apply(&entry.operations);
                last_lsn = entry.lsn;
                replayed += 1;
            }
        }

        let mut wal = WalWriter::open(&wal_path, sync_strategy)?;
        wal.advance_lsn(last_lsn);

        // Step 3: Make recovered data durable in a snapshot before truncating
        if replayed > 0 {
            tracing::info!("Folding {} replayed records into snapshot", replayed);
            snapshot::write(&snapshot_path, last_lsn, &memtable.entries())?;
            wal.truncate()?;
        }

        Ok(Self {
            memtable,
            durability: Some(Durability {
                dir: dir.to_path_buf(),
                wal: Mutex::new(wal),
                snapshot_threshold,
            }),
            write_lock: Mutex::new(()),
            txn_lock: Mutex::new(()),
        })
    }

    /// Write a snapshot and truncate the WAL
    pub fn checkpoint(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    /// Close the store gracefully
    ///
    /// Snapshots the key space and syncs the (now empty) WAL.
    pub fn close(self) -> Result<()> {
        if let Some(durability) = &self.durability {
            let _write_guard = self.write_lock.lock();
            self.checkpoint_locked()?;
            durability.wal.lock().sync()?;
        }
        Ok(())
    }

    /// Called with the write lock held
    fn checkpoint_locked(&self) -> Result<()> {
        let Some(durability) = &self.durability else {
            return Ok(());
        };

        let mut wal = durability.wal.lock();
        let last_lsn = wal.current_lsn().saturating_sub(1);
        snapshot::write(
            &durability.dir.join(Self::SNAPSHOT_FILENAME),
            last_lsn,
            &self.memtable.entries(),
        )?;
        wal.truncate()?;
        tracing::debug!("Checkpoint written at lsn {}", last_lsn);
        Ok(())
    }

    /// Log then apply; called with the write lock held
    fn commit_locked(&self, operations: Vec<Operation>) -> Result<()> {
        if let Some(durability) = &self.durability {
            let wal_len = {
                let mut wal = durability.wal.lock();
                wal.append(operations.clone())?;
                wal.len()
            };
            self.memtable.apply(&operations);

            if wal_len >= durability.snapshot_threshold {
                self.checkpoint_locked()?;
            }
        } else {
            self.memtable.apply(&operations);
        }
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Approximate size of the key space in bytes
    pub fn size(&self) -> usize {
        self.memtable.size()
    }

    /// Data directory of a durable store
    pub fn data_dir(&self) -> Option<&Path> {
        self.durability.as_ref().map(|d| d.dir.as_path())
    }

    /// Current WAL size in bytes (0 for a volatile store)
    pub fn wal_len(&self) -> u64 {
        self.durability
            .as_ref()
            .map(|d| d.wal.lock().len())
            .unwrap_or(0)
    }
}

impl KvStore for LocalKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.memtable.get(key))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.memtable.contains(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.commit_locked(vec![Operation::Put {
            key: key.to_string(),
            value: value.to_vec(),
        }])
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let _write_guard = self.write_lock.lock();
        if !self.memtable.contains(key) {
            return Ok(false);
        }
        self.commit_locked(vec![Operation::Delete {
            key: key.to_string(),
        }])?;
        Ok(true)
    }

    fn incr(&self, key: &str) -> Result<u64> {
        let _write_guard = self.write_lock.lock();

        let current = match self.memtable.get(key) {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    KvsnsError::InvalidArgument(format!("Key {} does not hold a counter", key))
                })?,
            None => 0,
        };

        let next = current + 1;
        self.commit_locked(vec![Operation::Put {
            key: key.to_string(),
            value: next.to_string().into_bytes(),
        }])?;
        Ok(next)
    }

    fn scan(&self, pattern: &str, cursor: Option<&str>, count: usize) -> Result<ScanPage> {
        if count == 0 {
            return Err(KvsnsError::InvalidArgument(
                "Scan page size must be positive".to_string(),
            ));
        }
        let (keys, more) = self.memtable.scan(pattern, cursor, count);
        let cursor = if more { keys.last().cloned() } else { None };
        Ok(ScanPage { keys, cursor })
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _write_guard = self.write_lock.lock();
        self.commit_locked(batch.into_operations())
    }

    fn transaction_lock(&self) -> &Mutex<()> {
        &self.txn_lock
    }
}
