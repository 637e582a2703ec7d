//! Tiered Storage Module
//!
//! File data never lives in the KV substrate. It is delegated to exactly
//! one backend bound at startup, which may keep it on one tier or move it
//! between a fast tier and an archive tier.
//!
//! ## Responsibilities
//! - The plug-in contract every backend implements (`Extstore`)
//! - The HSM state machine (`CacheState`)
//! - Backend-persisted data attributes (`N.data`)
//! - Selecting the backend from configuration
//!
//! ## Backends
//! ```text
//!   PosixStore   one file per entry            single tier
//!   TieredStore  fast dir + ObjectStore        CACHED/DUPLICATED/RELEASED
//!   BlockStore   whole-block transport         single tier
//! ```

mod block;
mod hsm;
mod objstore;
mod posix;
mod tiered;

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::config::{ArchiveConfig, BackendConfig, Config};
use crate::error::{KvsnsError, Result};
use crate::keys;
use crate::kvs::{KvStore, Transaction, WriteBatch};
use crate::types::{EntryId, Timespec};

pub use block::BlockStore;
pub use hsm::{CacheState, Transition};
pub use objstore::{CommandObjectStore, DirObjectStore, ObjectStore};
pub use posix::PosixStore;
pub use tiered::TieredStore;

/// Size and timestamps of an entry's data as the backend sees them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAttr {
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl DataAttr {
    /// Empty data created now
    pub fn empty_now() -> Self {
        let now = Timespec::now();
        Self {
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Attributes of a local file
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime = meta.modified().map(Timespec::from).unwrap_or_default();
        let atime = meta.accessed().map(Timespec::from).unwrap_or(mtime);
        Self {
            size: meta.len(),
            atime,
            mtime,
            ctime: mtime,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Result of a backend read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadReply {
    pub data: Vec<u8>,

    /// The read reached the end of the data
    pub eof: bool,
}

/// Result of a backend write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteReply {
    pub written: usize,

    /// Attributes after the write
    pub attr: DataAttr,
}

/// The backend plug-in contract
///
/// `create` and `attach` join the caller's transaction so the handle
/// binding commits together with the new entry. Every other operation
/// runs outside namespace transactions.
pub trait Extstore: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &'static str;

    /// Allocate fresh data for a new file entry
    fn create(&self, txn: &mut Transaction<'_>, id: EntryId) -> Result<()>;

    /// Bind a new file entry to an existing backend object
    fn attach(&self, _txn: &mut Transaction<'_>, _id: EntryId, _objid: &str) -> Result<DataAttr> {
        Err(KvsnsError::Unsupported("attach"))
    }

    fn read(&self, id: EntryId, offset: u64, len: usize) -> Result<ReadReply>;

    fn write(&self, id: EntryId, offset: u64, data: &[u8]) -> Result<WriteReply>;

    /// Set the data size, returning the new attributes
    fn truncate(&self, id: EntryId, size: u64) -> Result<DataAttr>;

    /// Remove all data and backend records of the entry
    fn delete(&self, id: EntryId) -> Result<()>;

    fn getattr(&self, id: EntryId) -> Result<DataAttr>;

    // =========================================================================
    // HSM
    // =========================================================================

    fn archive(&self, _id: EntryId) -> Result<()> {
        Err(KvsnsError::Unsupported("archive"))
    }

    fn restore(&self, _id: EntryId) -> Result<()> {
        Err(KvsnsError::Unsupported("restore"))
    }

    fn release(&self, _id: EntryId) -> Result<()> {
        Err(KvsnsError::Unsupported("release"))
    }

    fn state(&self, _id: EntryId) -> Result<CacheState> {
        Err(KvsnsError::Unsupported("state"))
    }

    // =========================================================================
    // Bulk copy
    // =========================================================================

    /// Stream the first `filesize` bytes of the entry into `dst`
    fn copy_to(
        &self,
        id: EntryId,
        dst: &mut dyn Write,
        io_size: usize,
        filesize: u64,
    ) -> Result<u64> {
        check_io_size(io_size)?;
        let mut offset = 0u64;
        while offset < filesize {
            let want = (filesize - offset).min(io_size as u64) as usize;
            let reply = self.read(id, offset, want)?;
            if reply.data.is_empty() {
                break;
            }
            dst.write_all(&reply.data)?;
            offset += reply.data.len() as u64;
            if reply.eof {
                break;
            }
        }
        dst.flush()?;
        Ok(offset)
    }

    /// Fill the entry from `src`, at most `filesize` bytes
    fn copy_from(
        &self,
        id: EntryId,
        src: &mut dyn Read,
        io_size: usize,
        filesize: u64,
    ) -> Result<u64> {
        check_io_size(io_size)?;
        let mut buf = vec![0u8; io_size];
        let mut offset = 0u64;
        while offset < filesize {
            let want = (filesize - offset).min(io_size as u64) as usize;
            let n = read_up_to(src, &mut buf[..want])?;
            if n == 0 {
                break;
            }
            self.write(id, offset, &buf[..n])?;
            offset += n as u64;
        }
        Ok(offset)
    }
}

/// Bind the configured backend
pub fn open_backend(config: &Config, kv: Arc<dyn KvStore>) -> Result<Arc<dyn Extstore>> {
    let backend: Arc<dyn Extstore> = match &config.backend {
        BackendConfig::Posix { root } => Arc::new(PosixStore::init(root, kv)?),
        BackendConfig::Tiered { cache_dir, archive } => {
            let archive: Box<dyn ObjectStore> = match archive {
                ArchiveConfig::Directory { root } => Box::new(DirObjectStore::open(root)?),
                ArchiveConfig::Command { put, get, delete } => Box::new(CommandObjectStore::new(
                    put.clone(),
                    get.clone(),
                    delete.clone(),
                )?),
            };
            Arc::new(TieredStore::init(cache_dir, archive, kv)?)
        }
        BackendConfig::Block { root, block_size } => {
            Arc::new(BlockStore::init(root, *block_size, config.io_retry, kv)?)
        }
    };
    tracing::info!("Bound data backend: {}", backend.name());
    Ok(backend)
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Read the persisted `N.data` record
pub(crate) fn load_data_attr(kv: &dyn KvStore, id: EntryId) -> Result<DataAttr> {
    match kv.get(&keys::data(id))? {
        Some(bytes) => DataAttr::decode(&bytes),
        None => Err(KvsnsError::NotFound(format!("data attributes of entry {}", id))),
    }
}

pub(crate) fn store_data_attr(kv: &dyn KvStore, id: EntryId, attr: &DataAttr) -> Result<()> {
    kv.set(&keys::data(id), &attr.encode()?)
}

/// Object reference of an entry
pub(crate) fn load_objid(kv: &dyn KvStore, id: EntryId) -> Result<String> {
    kv.get_string(&keys::objid(id))?
        .ok_or_else(|| KvsnsError::NotFound(format!("object of entry {}", id)))
}

/// Bind `objid` to `id` inside the creating transaction.
///
/// An object already held by another entry is refused: both entries would
/// otherwise delete it when unlinked.
pub(crate) fn bind_objid(txn: &mut Transaction<'_>, id: EntryId, objid: &str) -> Result<()> {
    let owner_key = keys::objid_owner(objid);
    if let Some(bytes) = txn.get(&owner_key)? {
        let holder = keys::parse_id(&bytes)?;
        if holder != id {
            return Err(KvsnsError::AlreadyExists(format!(
                "object {} is bound to entry {}",
                objid, holder
            )));
        }
    }
    txn.set_string(owner_key, &id.to_string());
    txn.set_string(keys::objid(id), objid);
    Ok(())
}

/// Add the removal of both object bindings of `id` to `batch`
pub(crate) fn unbind_objid(batch: &mut WriteBatch, id: EntryId, objid: Option<&str>) {
    if let Some(objid) = objid {
        batch.delete(keys::objid_owner(objid));
    }
    batch.delete(keys::objid(id));
}

fn check_io_size(io_size: usize) -> Result<()> {
    if io_size == 0 {
        return Err(KvsnsError::InvalidArgument("Copy chunk size must be positive".to_string()));
    }
    Ok(())
}

/// Read until `buf` is full or the source is exhausted
fn read_up_to(src: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Number of per-entry lock stripes
const LOCK_STRIPES: usize = 64;

/// Serializes operations on the same entry without a lock per entry
pub(crate) struct EntryLocks {
    stripes: Vec<Mutex<()>>,
}

impl EntryLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) fn lock(&self, id: EntryId) -> MutexGuard<'_, ()> {
        self.stripes[(id % LOCK_STRIPES as u64) as usize].lock()
    }
}
