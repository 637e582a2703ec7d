//! Single-tier local directory backend
//!
//! One plain file per object under `root`. Data is always authoritative
//! on this tier, so the HSM operations are not offered.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{KvsnsError, Result};
use crate::kvs::{KvStore, Transaction, WriteBatch};
use crate::types::EntryId;

use super::{bind_objid, load_objid, unbind_objid, CacheState, DataAttr, Extstore, ReadReply, WriteReply};

pub struct PosixStore {
    root: PathBuf,
    kv: Arc<dyn KvStore>,
}

impl PosixStore {
    /// Use `root` (created if missing) as the data directory
    pub fn init(root: &Path, kv: Arc<dyn KvStore>) -> Result<Self> {
        fs::create_dir_all(root)?;
        tracing::info!("Posix data directory at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            kv,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, objid: &str) -> Result<PathBuf> {
        if objid.is_empty() || objid.contains('/') || objid == "." || objid == ".." {
            return Err(KvsnsError::InvalidArgument(format!(
                "Invalid object id: {:?}",
                objid
            )));
        }
        Ok(self.root.join(objid))
    }

    fn entry_path(&self, id: EntryId) -> Result<PathBuf> {
        self.object_path(&load_objid(self.kv.as_ref(), id)?)
    }

    fn open_file(&self, id: EntryId, write: bool) -> Result<File> {
        let path = self.entry_path(id)?;
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(&path)
            .map_err(|e| not_found_as(e, id))
    }
}

fn not_found_as(e: io::Error, id: EntryId) -> KvsnsError {
    match e.kind() {
        ErrorKind::NotFound => KvsnsError::NotFound(format!("data of entry {}", id)),
        _ => KvsnsError::Io(e),
    }
}

impl Extstore for PosixStore {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn create(&self, txn: &mut Transaction<'_>, id: EntryId) -> Result<()> {
        let objid = id.to_string();
        let path = self.object_path(&objid)?;
        bind_objid(txn, id, &objid)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    KvsnsError::AlreadyExists(format!("data object {}", objid))
                }
                _ => KvsnsError::Io(e),
            })?;
        Ok(())
    }

    fn attach(&self, txn: &mut Transaction<'_>, id: EntryId, objid: &str) -> Result<DataAttr> {
        let path = self.object_path(objid)?;
        let meta = fs::metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KvsnsError::NotFound(format!("data object {}", objid)),
            _ => KvsnsError::Io(e),
        })?;
        if !meta.is_file() {
            return Err(KvsnsError::InvalidArgument(format!(
                "Object {} is not a regular file",
                objid
            )));
        }
        bind_objid(txn, id, objid)?;
        Ok(DataAttr::from_metadata(&meta))
    }

    fn read(&self, id: EntryId, offset: u64, len: usize) -> Result<ReadReply> {
        let mut file = self.open_file(id, false)?;
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
        let mut file = self.open_file(id, true)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        let attr = DataAttr::from_metadata(&file.metadata()?);
        Ok(WriteReply {
            written: data.len(),
            attr,
        })
    }

    fn truncate(&self, id: EntryId, size: u64) -> Result<DataAttr> {
        let file = self.open_file(id, true)?;
        file.set_len(size)?;
        Ok(DataAttr::from_metadata(&file.metadata()?))
    }

    fn delete(&self, id: EntryId) -> Result<()> {
        let objid = load_objid(self.kv.as_ref(), id)?;
        let path = self.object_path(&objid)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("Data file of entry {} already gone", id);
            }
            Err(e) => return Err(e.into()),
        }
        let mut batch = WriteBatch::new();
        unbind_objid(&mut batch, id, Some(&objid));
        self.kv.apply(batch)
    }

    fn getattr(&self, id: EntryId) -> Result<DataAttr> {
        let path = self.entry_path(id)?;
        let meta = fs::metadata(&path).map_err(|e| not_found_as(e, id))?;
        Ok(DataAttr::from_metadata(&meta))
    }

    fn state(&self, _id: EntryId) -> Result<CacheState> {
        Ok(CacheState::Cached)
    }

    fn copy_to(
        &self,
        id: EntryId,
        dst: &mut dyn Write,
        _io_size: usize,
        filesize: u64,
    ) -> Result<u64> {
        let file = self.open_file(id, false)?;
        let copied = io::copy(&mut file.take(filesize), dst)?;
        dst.flush()?;
        Ok(copied)
    }

    fn copy_from(
        &self,
        id: EntryId,
        src: &mut dyn Read,
        _io_size: usize,
        filesize: u64,
    ) -> Result<u64> {
        let mut file = self.open_file(id, true)?;
        let copied = io::copy(&mut src.take(filesize), &mut file)?;
        file.sync_data()?;
        Ok(copied)
    }
}
