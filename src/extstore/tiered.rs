//! Two-tier backend with a pseudo-HSM lifecycle
//!
//! The fast tier is a local directory holding one file per entry, named by
//! entry id. The archive tier is an `ObjectStore` addressed by the entry's
//! `objid`. Which tier is authoritative is tracked in `N.cache_state`.
//!
//! ## Implicit transitions
//! - read/write of a RELEASED entry restores it first
//! - a write to a DUPLICATED entry makes the archive copy stale: back to CACHED
//! - truncate of a RELEASED entry only rewrites the persisted `N.data`
//!
//! Operations on the same entry are serialized by stripe locks.

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{KvsnsError, Result};
use crate::keys;
use crate::kvs::{KvStore, Transaction, WriteBatch};
use crate::types::{EntryId, Timespec};

use super::{
    bind_objid, load_data_attr, load_objid, store_data_attr, unbind_objid, CacheState, DataAttr,
    EntryLocks, Extstore, ObjectStore, ReadReply, Transition, WriteReply,
};

pub struct TieredStore {
    cache_dir: PathBuf,
    archive: Box<dyn ObjectStore>,
    kv: Arc<dyn KvStore>,
    locks: EntryLocks,
}

impl TieredStore {
    /// Use `cache_dir` (created if missing) as the fast tier
    pub fn init(cache_dir: &Path, archive: Box<dyn ObjectStore>, kv: Arc<dyn KvStore>) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;
        tracing::info!("Tiered backend: fast tier at {:?}", cache_dir);
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            archive,
            kv,
            locks: EntryLocks::new(),
        })
    }

    /// Path of the fast-tier copy of an entry
    pub fn fast_path(&self, id: EntryId) -> PathBuf {
        self.cache_dir.join(id.to_string())
    }

    fn load_state(&self, id: EntryId) -> Result<CacheState> {
        self.kv
            .get_string(&keys::cache_state(id))?
            .ok_or_else(|| KvsnsError::NotFound(format!("cache state of entry {}", id)))?
            .parse()
    }

    fn set_state(&self, id: EntryId, state: CacheState) -> Result<()> {
        self.kv.set_string(&keys::cache_state(id), state.as_str())
    }

    fn open_fast(&self, id: EntryId, write: bool) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(self.fast_path(id))
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => KvsnsError::NotFound(format!("fast copy of entry {}", id)),
                _ => KvsnsError::Io(e),
            })
    }

    /// Bring a RELEASED entry back onto the fast tier; caller holds the entry lock
    fn restore_locked(&self, id: EntryId, state: CacheState) -> Result<CacheState> {
        let next = match state.restore()? {
            Transition::Noop => return Ok(state),
            Transition::To(next) => next,
        };

        let objid = load_objid(self.kv.as_ref(), id)?;
        let attr = load_data_attr(self.kv.as_ref(), id)?;
        let path = self.fast_path(id);
        self.archive.get(&objid, &path)?;

        // the archive copy predates any truncate done while released
        let file = OpenOptions::new().write(true).open(&path)?;
        if file.metadata()?.len() != attr.size {
            file.set_len(attr.size)?;
        }
        file.set_times(
            FileTimes::new()
                .set_accessed(attr.atime.to_system_time())
                .set_modified(attr.mtime.to_system_time()),
        )?;

        self.set_state(id, next)?;
        tracing::info!("Restored entry {} from archive object {}", id, objid);
        Ok(next)
    }
}

impl Extstore for TieredStore {
    fn name(&self) -> &'static str {
        "tiered"
    }

    fn create(&self, txn: &mut Transaction<'_>, id: EntryId) -> Result<()> {
        bind_objid(txn, id, &id.to_string())?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.fast_path(id))
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    KvsnsError::AlreadyExists(format!("fast copy of entry {}", id))
                }
                _ => KvsnsError::Io(e),
            })?;
        txn.set_string(keys::cache_state(id), CacheState::Cached.as_str());
        Ok(())
    }

    fn attach(&self, txn: &mut Transaction<'_>, id: EntryId, objid: &str) -> Result<DataAttr> {
        bind_objid(txn, id, objid)?;
        let path = self.fast_path(id);
        self.archive.get(objid, &path)?;
        let attr = DataAttr::from_metadata(&fs::metadata(&path)?);

        // both tiers now hold the object
        txn.set_string(keys::cache_state(id), CacheState::Duplicated.as_str());
        txn.set(keys::data(id), attr.encode()?);
        Ok(attr)
    }

    fn read(&self, id: EntryId, offset: u64, len: usize) -> Result<ReadReply> {
        let _guard = self.locks.lock(id);
        let state = self.load_state(id)?;
        if !state.has_fast_copy() {
            self.restore_locked(id, state)?;
        }

        let mut file = self.open_fast(id, false)?;
        let size = file.metadata()?.len();
        if offset >= size {
            return Ok(ReadReply {
                data: Vec::new(),
                eof: true,
            });
        }
        let want = (size - offset).min(len as u64);
        let mut data = Vec::with_capacity(want as usize);
        file.seek(SeekFrom::Start(offset))?;
        file.take(want).read_to_end(&mut data)?;
        let eof = offset + data.len() as u64 >= size;
        Ok(ReadReply { data, eof })
    }

    fn write(&self, id: EntryId, offset: u64, data: &[u8]) -> Result<WriteReply> {
        let _guard = self.locks.lock(id);
        let mut state = self.load_state(id)?;
        if !state.has_fast_copy() {
            state = self.restore_locked(id, state)?;
        }

        let mut file = self.open_fast(id, true)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        let attr = DataAttr::from_metadata(&file.metadata()?);

        let next = state.after_write();
        if next != state {
            self.set_state(id, next)?;
            tracing::debug!("Entry {} written while {}, now {}", id, state, next);
        }
        Ok(WriteReply {
            written: data.len(),
            attr,
        })
    }

    fn truncate(&self, id: EntryId, size: u64) -> Result<DataAttr> {
        let _guard = self.locks.lock(id);
        let state = self.load_state(id)?;

        if !state.has_fast_copy() {
            let mut attr = load_data_attr(self.kv.as_ref(), id)?;
            let now = Timespec::now();
            attr.size = size;
            attr.mtime = now;
            attr.ctime = now;
            store_data_attr(self.kv.as_ref(), id, &attr)?;
            return Ok(attr);
        }

        let file = self.open_fast(id, true)?;
        file.set_len(size)?;
        if state == CacheState::Duplicated {
            self.set_state(id, CacheState::Cached)?;
        }
        Ok(DataAttr::from_metadata(&file.metadata()?))
    }

    fn delete(&self, id: EntryId) -> Result<()> {
        let _guard = self.locks.lock(id);
        let state = self.load_state(id).ok();

        match fs::remove_file(self.fast_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let objid = self.kv.get_string(&keys::objid(id))?;
        if state.map_or(true, |s| s.has_archive_copy()) {
            if let Some(objid) = &objid {
                match self.archive.delete(objid) {
                    Ok(()) => {}
                    Err(KvsnsError::NotFound(_)) => {
                        tracing::warn!("Archive object {} of entry {} already gone", objid, id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut batch = WriteBatch::new();
        batch.delete(keys::cache_state(id));
        unbind_objid(&mut batch, id, objid.as_deref());
        batch.delete(keys::data(id));
        self.kv.apply(batch)
    }

    fn getattr(&self, id: EntryId) -> Result<DataAttr> {
        let _guard = self.locks.lock(id);
        if self.load_state(id)?.has_fast_copy() {
            let meta = fs::metadata(self.fast_path(id))?;
            Ok(DataAttr::from_metadata(&meta))
        } else {
            load_data_attr(self.kv.as_ref(), id)
        }
    }

    fn archive(&self, id: EntryId) -> Result<()> {
        let _guard = self.locks.lock(id);
        let state = self.load_state(id)?;
        let next = match state.archive()? {
            Transition::Noop => return Ok(()),
            Transition::To(next) => next,
        };

        let objid = load_objid(self.kv.as_ref(), id)?;
        let path = self.fast_path(id);
        self.archive.put(&objid, &path)?;

        let attr = DataAttr::from_metadata(&fs::metadata(&path)?);
        let mut batch = WriteBatch::new();
        batch.put(keys::data(id), attr.encode()?);
        batch.put(keys::cache_state(id), next.as_str());
        self.kv.apply(batch)?;
        tracing::info!("Archived entry {} as {}", id, objid);
        Ok(())
    }

    fn restore(&self, id: EntryId) -> Result<()> {
        let _guard = self.locks.lock(id);
        let state = self.load_state(id)?;
        self.restore_locked(id, state)?;
        Ok(())
    }

    fn release(&self, id: EntryId) -> Result<()> {
        let _guard = self.locks.lock(id);
        let state = self.load_state(id)?;
        let next = match state.release()? {
            Transition::Noop => return Ok(()),
            Transition::To(next) => next,
        };

        let path = self.fast_path(id);
        let attr = DataAttr::from_metadata(&fs::metadata(&path)?);
        let mut batch = WriteBatch::new();
        batch.put(keys::data(id), attr.encode()?);
        batch.put(keys::cache_state(id), next.as_str());
        self.kv.apply(batch)?;

        fs::remove_file(&path)?;
        tracing::info!("Released fast copy of entry {}", id);
        Ok(())
    }

    fn state(&self, id: EntryId) -> Result<CacheState> {
        self.load_state(id)
    }
}
