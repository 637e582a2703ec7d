//! Whole-block backend
//!
//! Data goes through the block-aligned engine to a transport that only
//! moves whole blocks. The transport cannot tell the byte size of an
//! object, so size and timestamps live in `N.data`.

use std::path::Path;
use std::sync::Arc;

use crate::blockio::{AlignedIo, BlockTransport, FileBlockDevice};
use crate::config::IoRetryPolicy;
use crate::error::{KvsnsError, Result};
use crate::keys;
use crate::kvs::{KvStore, Transaction, WriteBatch};
use crate::types::{EntryId, Timespec};

use super::{
    bind_objid, load_data_attr, load_objid, store_data_attr, unbind_objid, CacheState, DataAttr,
    EntryLocks, Extstore, ReadReply, WriteReply,
};

pub struct BlockStore {
    transport: Box<dyn BlockTransport>,
    retry: IoRetryPolicy,
    kv: Arc<dyn KvStore>,
    locks: EntryLocks,
}

impl BlockStore {
    /// File-backed block store under `root`
    pub fn init(
        root: &Path,
        block_size: u64,
        retry: IoRetryPolicy,
        kv: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let device = FileBlockDevice::open(root, block_size)?;
        tracing::info!("Block backend at {:?} ({} byte blocks)", root, block_size);
        Ok(Self::with_transport(Box::new(device), retry, kv))
    }

    /// Block store over any transport
    pub fn with_transport(
        transport: Box<dyn BlockTransport>,
        retry: IoRetryPolicy,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            transport,
            retry,
            kv,
            locks: EntryLocks::new(),
        }
    }

    fn io(&self) -> AlignedIo<'_, dyn BlockTransport> {
        AlignedIo::new(self.transport.as_ref(), self.retry)
    }
}

impl Extstore for BlockStore {
    fn name(&self) -> &'static str {
        "block"
    }

    fn create(&self, txn: &mut Transaction<'_>, id: EntryId) -> Result<()> {
        let objid = format!("obj{}", id);
        bind_objid(txn, id, &objid)?;
        self.transport.create(&objid)?;
        txn.set(keys::data(id), DataAttr::empty_now().encode()?);
        Ok(())
    }

    fn read(&self, id: EntryId, offset: u64, len: usize) -> Result<ReadReply> {
        let _guard = self.locks.lock(id);
        let objid = load_objid(self.kv.as_ref(), id)?;
        let attr = load_data_attr(self.kv.as_ref(), id)?;
        if offset >= attr.size {
            return Ok(ReadReply {
                data: Vec::new(),
                eof: true,
            });
        }

        let want = (attr.size - offset).min(len as u64) as usize;
        let mut data = vec![0u8; want];
        self.io().pread(&objid, offset, &mut data)?;
        Ok(ReadReply {
            data,
            eof: offset + want as u64 >= attr.size,
        })
    }

    fn write(&self, id: EntryId, offset: u64, data: &[u8]) -> Result<WriteReply> {
        let _guard = self.locks.lock(id);
        let objid = load_objid(self.kv.as_ref(), id)?;
        let mut attr = load_data_attr(self.kv.as_ref(), id)?;

        let written = self.io().pwrite(&objid, offset, data)?;
        let now = Timespec::now();
        attr.size = attr.size.max(offset + written as u64);
        attr.mtime = now;
        attr.ctime = now;
        store_data_attr(self.kv.as_ref(), id, &attr)?;
        Ok(WriteReply { written, attr })
    }

    fn truncate(&self, id: EntryId, size: u64) -> Result<DataAttr> {
        let _guard = self.locks.lock(id);
        let objid = load_objid(self.kv.as_ref(), id)?;
        let mut attr = load_data_attr(self.kv.as_ref(), id)?;

        if size < attr.size {
            let bs = self.transport.block_size();
            let kept_end = size.div_ceil(bs) * bs;
            // bytes past the new end inside the last kept block must read back as zeros
            let zero_to = attr.size.min(kept_end);
            if zero_to > size {
                let zeros = vec![0u8; (zero_to - size) as usize];
                self.io().pwrite(&objid, size, &zeros)?;
            }
            self.transport.shrink(&objid, kept_end)?;
        }

        let now = Timespec::now();
        attr.size = size;
        attr.mtime = now;
        attr.ctime = now;
        store_data_attr(self.kv.as_ref(), id, &attr)?;
        Ok(attr)
    }

    fn delete(&self, id: EntryId) -> Result<()> {
        let _guard = self.locks.lock(id);
        let objid = load_objid(self.kv.as_ref(), id)?;
        match self.transport.remove(&objid) {
            Ok(()) => {}
            Err(KvsnsError::NotFound(_)) => {
                tracing::warn!("Block object {} of entry {} already gone", objid, id);
            }
            Err(e) => return Err(e),
        }

        let mut batch = WriteBatch::new();
        unbind_objid(&mut batch, id, Some(&objid));
        batch.delete(keys::data(id));
        self.kv.apply(batch)
    }

    fn getattr(&self, id: EntryId) -> Result<DataAttr> {
        load_data_attr(self.kv.as_ref(), id)
    }

    fn state(&self, _id: EntryId) -> Result<CacheState> {
        Ok(CacheState::Cached)
    }
}
