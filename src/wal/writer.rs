//! WAL Writer
//!
//! Handles appending records to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::{Operation, WalEntry, WalReader};

/// Writes records to the WAL file
pub struct WalWriter {
    /// Buffered handle, flushed after every append
    writer: BufWriter<File>,

    /// LSN assigned to the next append
    next_lsn: u64,

    /// When to fsync
    sync_strategy: WalSyncStrategy,

    /// Appends since the last fsync
    unsynced: usize,

    /// Current file length in bytes
    len: u64,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// An existing log is scanned so that LSNs continue after its last
    /// valid record. Recovery must already have removed any corrupt tail.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let mut next_lsn = 1;
        if path.exists() {
            for entry in WalReader::open(path)?.entries() {
                next_lsn = entry?.lsn + 1;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            writer: BufWriter::new(file),
            next_lsn,
            sync_strategy,
            unsynced: 0,
            len,
        })
    }

    /// Append a batch to the WAL, returning its LSN
    pub fn append(&mut self, operations: Vec<Operation>) -> Result<u64> {
        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operations).serialize()?;

        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        self.len += bytes.len() as u64;
        self.next_lsn += 1;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }

        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every record; LSNs keep increasing afterwards
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;
        self.len = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// Raise the next LSN (used after loading a snapshot newer than the log)
    pub fn advance_lsn(&mut self, last_lsn: u64) {
        if last_lsn >= self.next_lsn {
            self.next_lsn = last_lsn + 1;
        }
    }

    /// Get the LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Current log size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
