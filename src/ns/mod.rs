//! Namespace Module
//!
//! A POSIX-like tree of directories, files and symlinks whose metadata
//! lives in the KV substrate and whose file data lives in the bound
//! backend.
//!
//! ## Responsibilities
//! - Entry lifecycle: create, link, unlink, rename, rmdir
//! - Lookup by name, by parent and by path
//! - Attributes, permissions and extended attributes
//! - Open-owner tracking and deferred deletion of open entries
//! - Data I/O and HSM requests forwarded to the backend
//!
//! ## Atomicity
//! Every multi-key mutation runs inside one KV transaction. Backend data
//! deletion happens after the transaction commits and is not rolled back
//! with it.

mod codec;
mod cred;
mod dir;
mod entry;
mod file;
mod stat;
mod xattr;

use std::sync::Arc;

use crate::config::Config;
use crate::error::{KvsnsError, Result};
use crate::extstore::{self, Extstore};
use crate::keys;
use crate::kvs::{KvStore, LocalKvStore, Transaction};
use crate::types::{EntryId, FIRST_ALLOCATED_ID, ROOT_ID};

pub use codec::{decode_list, encode_list, LIST_VERSION};
pub use cred::{check_access, check_owner_or_write, Access, Cred};
pub use dir::{DirEntry, DirListing};
pub use file::{FileHandle, OpenFlags, OpenOwner};
pub use stat::{
    AttrMask, EntryType, Stat, PERM_MASK, STAT_RECORD_SIZE, STAT_VERSION, S_IFDIR, S_IFLNK,
    S_IFMT, S_IFREG,
};
pub use xattr::XattrFlag;

/// Namespace-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    /// Live entries, root included
    pub entries: u64,

    /// Id the allocator hands out next
    pub next_id: EntryId,
}

/// A namespace bound to a KV substrate and one data backend
pub struct Kvsns {
    kv: Arc<dyn KvStore>,
    backend: Arc<dyn Extstore>,
    config: Config,
}

impl Kvsns {
    /// Open the substrate and the configured backend
    pub fn start(config: Config) -> Result<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(LocalKvStore::open(&config)?);
        let backend = extstore::open_backend(&config, Arc::clone(&kv))?;
        Ok(Self::with_parts(kv, backend, config))
    }

    /// Assemble from already opened parts
    pub fn with_parts(kv: Arc<dyn KvStore>, backend: Arc<dyn Extstore>, config: Config) -> Self {
        Self {
            kv,
            backend,
            config,
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn backend(&self) -> &Arc<dyn Extstore> {
        &self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create the root directory and seed the id allocator, unless already done.
    ///
    /// `openbar` makes the root world-writable.
    pub fn init_root(&self, openbar: bool) -> Result<()> {
        let mut txn = self.kv.begin();
        if txn.exists(&keys::stat(ROOT_ID))? {
            tracing::debug!("Root already initialized");
            return Ok(());
        }

        let perm = if openbar { 0o777 } else { 0o755 };
        let stat = Stat::new(ROOT_ID, EntryType::Dir, perm, 0, 0);
        txn.set(keys::stat(ROOT_ID), stat.encode());
        txn.set(keys::parentdir(ROOT_ID), encode_list(&[ROOT_ID])?);
        txn.set_string(keys::INO_COUNTER, &FIRST_ALLOCATED_ID.to_string());
        txn.commit()?;

        tracing::info!("Initialized namespace root (mode {:o})", perm);
        Ok(())
    }

    pub fn get_root(&self) -> EntryId {
        ROOT_ID
    }

    pub fn fsstat(&self) -> Result<FsStat> {
        let entries = self
            .kv
            .scan_all(keys::STAT_PATTERN)?
            .iter()
            .filter(|k| keys::stat_owner(k).is_some())
            .count() as u64;

        let next_id = match self.kv.get(keys::INO_COUNTER)? {
            Some(bytes) => keys::parse_id(&bytes)?,
            None => FIRST_ALLOCATED_ID,
        };
        Ok(FsStat { entries, next_id })
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Hand out a fresh id; the counter holds the next one
    fn alloc_id(&self) -> Result<EntryId> {
        Ok(self.kv.incr(keys::INO_COUNTER)? - 1)
    }

    fn load_stat(&self, id: EntryId) -> Result<Stat> {
        match self.kv.get(&keys::stat(id))? {
            Some(bytes) => Stat::decode(&bytes),
            None => Err(KvsnsError::NotFound(format!("entry {}", id))),
        }
    }

    fn load_dir(&self, id: EntryId) -> Result<Stat> {
        let stat = self.load_stat(id)?;
        if !stat.is_dir() {
            return Err(KvsnsError::InvalidArgument(format!("Entry {} is not a directory", id)));
        }
        Ok(stat)
    }
}

// =============================================================================
// Transaction-scoped reads and writes
// =============================================================================

fn txn_stat(txn: &Transaction<'_>, id: EntryId) -> Result<Stat> {
    match txn.get(&keys::stat(id))? {
        Some(bytes) => Stat::decode(&bytes),
        None => Err(KvsnsError::NotFound(format!("entry {}", id))),
    }
}

fn txn_dir(txn: &Transaction<'_>, id: EntryId) -> Result<Stat> {
    let stat = txn_stat(txn, id)?;
    if !stat.is_dir() {
        return Err(KvsnsError::InvalidArgument(format!("Entry {} is not a directory", id)));
    }
    Ok(stat)
}

fn put_stat(txn: &mut Transaction<'_>, stat: &Stat) {
    txn.set(keys::stat(stat.ino), stat.encode());
}

fn txn_parents(txn: &Transaction<'_>, id: EntryId) -> Result<Vec<EntryId>> {
    match txn.get(&keys::parentdir(id))? {
        Some(bytes) => decode_list(&bytes),
        None => Ok(Vec::new()),
    }
}

fn txn_child(txn: &Transaction<'_>, dir: EntryId, name: &str) -> Result<EntryId> {
    match txn.get(&keys::dentry(dir, name))? {
        Some(bytes) => keys::parse_id(&bytes),
        None => Err(KvsnsError::NotFound(format!("{:?} in directory {}", name, dir))),
    }
}

/// Drop every metadata facet of an entry
fn remove_facets(txn: &mut Transaction<'_>, id: EntryId) -> Result<()> {
    txn.delete(keys::stat(id));
    txn.delete(keys::parentdir(id));
    txn.delete(keys::link(id));
    txn.delete(keys::openowner(id));
    txn.delete(keys::opened_and_deleted(id));
    let removed = xattr::remove_all_in(txn, id)?;
    tracing::debug!("Removed facets of entry {} ({} xattrs)", id, removed);
    Ok(())
}
