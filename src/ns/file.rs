//! Open files, data I/O and HSM requests
//!
//! ## Open Owners
//! `N.openowner` is a multiset of `(pid, tid)` pairs: each `open` adds one
//! occurrence and each `close` removes one. The key disappears with the
//! last occurrence. An entry unlinked while it has owners keeps its data
//! until that last close.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{KvsnsError, Result};
use crate::extstore::{CacheState, DataAttr, ReadReply};
use crate::keys;
use crate::types::EntryId;

use super::{
    check_access, decode_list, encode_list, put_stat, remove_facets, txn_stat, Access, Cred, Kvsns,
};

/// Process/thread pair holding an entry open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenOwner {
    pub pid: u32,
    pub tid: u64,
}

impl OpenOwner {
    pub fn new(pid: u32, tid: u64) -> Self {
        Self { pid, tid }
    }

    /// The calling thread
    pub fn current() -> Self {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        Self {
            pid: std::process::id(),
            tid: hasher.finish(),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Truncate to zero on open; needs WRITE
        const TRUNC = 1 << 2;
        /// Every write goes to the current end of data
        const APPEND = 1 << 3;
    }
}

/// An open file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub id: EntryId,
    pub owner: OpenOwner,
    pub flags: OpenFlags,
}

impl Kvsns {
    // =========================================================================
    // Open / Close
    // =========================================================================

    pub fn open(&self, cred: &Cred, id: EntryId, flags: OpenFlags, owner: OpenOwner) -> Result<FileHandle> {
        if !flags.intersects(OpenFlags::READ | OpenFlags::WRITE) {
            return Err(KvsnsError::InvalidArgument(
                "Open needs READ or WRITE".to_string(),
            ));
        }
        if flags.contains(OpenFlags::TRUNC) && !flags.contains(OpenFlags::WRITE) {
            return Err(KvsnsError::InvalidArgument("TRUNC needs WRITE".to_string()));
        }

        let mut txn = self.kv.begin();
        let stat = txn_stat(&txn, id)?;
        if !stat.is_file() {
            return Err(KvsnsError::InvalidArgument(format!("Entry {} is not a file", id)));
        }
        if stat.nlink == 0 {
            return Err(KvsnsError::NotFound(format!("entry {}", id)));
        }

        let mut access = Access::empty();
        if flags.contains(OpenFlags::READ) {
            access |= Access::READ;
        }
        if flags.contains(OpenFlags::WRITE) {
            access |= Access::WRITE;
        }
        check_access(cred, &stat, access)?;

        let mut owners: Vec<OpenOwner> = match txn.get(&keys::openowner(id))? {
            Some(bytes) => decode_list(&bytes)?,
            None => Vec::new(),
        };
        let limit = self.config.max_open_owners;
        if owners.len() >= limit {
            return Err(KvsnsError::TooManyOpens { limit });
        }
        owners.push(owner);
        txn.set(keys::openowner(id), encode_list(&owners)?);
        txn.commit()?;

        let handle = FileHandle { id, owner, flags };
        if flags.contains(OpenFlags::TRUNC) {
            let truncated = self
                .backend
                .truncate(id, 0)
                .and_then(|attr| self.refresh_stat(id, &attr));
            if let Err(e) = truncated {
                // the caller never sees this handle
                if let Err(close_err) = self.close(&handle) {
                    tracing::warn!("Dropping owner {:?} of entry {} failed: {}", owner, id, close_err);
                }
                return Err(e);
            }
        }
        tracing::trace!("Opened entry {} for {:?} ({} owners)", id, owner, owners.len());
        Ok(handle)
    }

    /// Drop one open by the handle's owner. The last close of an unlinked
    /// entry destroys it.
    pub fn close(&self, handle: &FileHandle) -> Result<()> {
        let id = handle.id;
        let mut txn = self.kv.begin();
        let mut owners: Vec<OpenOwner> = match txn.get(&keys::openowner(id))? {
            Some(bytes) => decode_list(&bytes)?,
            None => return Err(KvsnsError::BadHandle),
        };
        let pos = owners
            .iter()
            .position(|o| *o == handle.owner)
            .ok_or(KvsnsError::BadHandle)?;
        owners.remove(pos);

        let mut destroy = false;
        if owners.is_empty() {
            txn.delete(keys::openowner(id));
            if txn.exists(&keys::opened_and_deleted(id))? {
                remove_facets(&mut txn, id)?;
                destroy = true;
            }
        } else {
            txn.set(keys::openowner(id), encode_list(&owners)?);
        }
        txn.commit()?;

        if destroy {
            self.backend.delete(id)?;
            tracing::debug!("Last close destroyed unlinked entry {}", id);
        }
        Ok(())
    }

    // =========================================================================
    // Data I/O
    // =========================================================================

    pub fn read(&self, handle: &FileHandle, offset: u64, len: usize) -> Result<ReadReply> {
        if !handle.flags.contains(OpenFlags::READ) {
            return Err(KvsnsError::BadHandle);
        }
        self.backend.read(handle.id, offset, len)
    }

    /// Write at `offset` (ignored for APPEND handles), returning the bytes written
    pub fn write(&self, handle: &FileHandle, offset: u64, data: &[u8]) -> Result<usize> {
        if !handle.flags.contains(OpenFlags::WRITE) {
            return Err(KvsnsError::BadHandle);
        }
        let offset = if handle.flags.contains(OpenFlags::APPEND) {
            self.backend.getattr(handle.id)?.size
        } else {
            offset
        };

        let reply = self.backend.write(handle.id, offset, data)?;
        self.refresh_stat(handle.id, &reply.attr)?;
        Ok(reply.written)
    }

    /// Fill the file from `src`, at most `size` bytes
    pub fn copy_in(&self, handle: &FileHandle, src: &mut dyn Read, size: u64) -> Result<u64> {
        if !handle.flags.contains(OpenFlags::WRITE) {
            return Err(KvsnsError::BadHandle);
        }
        let copied = self
            .backend
            .copy_from(handle.id, src, self.config.copy_io_size, size)?;
        let attr = self.backend.getattr(handle.id)?;
        self.refresh_stat(handle.id, &attr)?;
        tracing::debug!("Copied {} bytes into entry {}", copied, handle.id);
        Ok(copied)
    }

    /// Stream the whole file into `dst`
    pub fn copy_out(&self, handle: &FileHandle, dst: &mut dyn Write) -> Result<u64> {
        if !handle.flags.contains(OpenFlags::READ) {
            return Err(KvsnsError::BadHandle);
        }
        let size = self.backend.getattr(handle.id)?.size;
        self.backend
            .copy_to(handle.id, dst, self.config.copy_io_size, size)
    }

    // =========================================================================
    // HSM
    // =========================================================================

    pub fn archive(&self, cred: &Cred, id: EntryId) -> Result<()> {
        self.check_file(cred, id, Access::WRITE)?;
        self.backend.archive(id)
    }

    pub fn release(&self, cred: &Cred, id: EntryId) -> Result<()> {
        self.check_file(cred, id, Access::WRITE)?;
        self.backend.release(id)
    }

    pub fn restore(&self, cred: &Cred, id: EntryId) -> Result<()> {
        self.check_file(cred, id, Access::READ)?;
        self.backend.restore(id)
    }

    pub fn state(&self, cred: &Cred, id: EntryId) -> Result<CacheState> {
        self.check_file(cred, id, Access::empty())?;
        self.backend.state(id)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check_file(&self, cred: &Cred, id: EntryId, access: Access) -> Result<()> {
        let stat = self.load_stat(id)?;
        if !stat.is_file() {
            return Err(KvsnsError::InvalidArgument(format!("Entry {} is not a file", id)));
        }
        check_access(cred, &stat, access)
    }

    /// Copy backend size and times into the stored stat
    fn refresh_stat(&self, id: EntryId, attr: &DataAttr) -> Result<()> {
        let mut txn = self.kv.begin();
        let mut stat = txn_stat(&txn, id)?;
        stat.merge_data(attr);
        put_stat(&mut txn, &stat);
        txn.commit()
    }
}
