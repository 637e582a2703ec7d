//! File-backed block device
//!
//! Each object is a sparse file under a root directory. Transfers are
//! checked for alignment; reads past the end of a file return zeros.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{KvsnsError, Result};

use super::BlockTransport;

/// Whole-block transport over local files
pub struct FileBlockDevice {
    root: PathBuf,
    block_size: u64,
}

impl FileBlockDevice {
    /// Use `root` (created if missing) with blocks of `block_size` bytes
    pub fn open(root: &Path, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(KvsnsError::Config("Block size must be positive".to_string()));
        }
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            block_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, obj: &str) -> Result<PathBuf> {
        if obj.is_empty() || obj.contains('/') || obj == "." || obj == ".." {
            return Err(KvsnsError::InvalidArgument(format!(
                "Invalid block object name: {:?}",
                obj
            )));
        }
        Ok(self.root.join(obj))
    }

    fn check_aligned(&self, offset: u64, len: usize) -> Result<()> {
        if offset % self.block_size != 0 || len as u64 % self.block_size != 0 {
            return Err(KvsnsError::InvalidArgument(format!(
                "Unaligned block transfer: offset {} len {} (block {})",
                offset, len, self.block_size
            )));
        }
        Ok(())
    }

    fn open_existing(&self, obj: &str, write: bool) -> Result<File> {
        let path = self.object_path(obj)?;
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => KvsnsError::NotFound(format!("block object {}", obj)),
                _ => KvsnsError::Io(e),
            })
    }
}

impl BlockTransport for FileBlockDevice {
    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn read_blocks(&self, obj: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_aligned(offset, buf.len())?;
        let mut file = self.open_existing(obj, false)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_blocks(&self, obj: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.check_aligned(offset, data.len())?;
        let mut file = self.open_existing(obj, true)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn create(&self, obj: &str) -> Result<()> {
        let path = self.object_path(obj)?;
        OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    KvsnsError::AlreadyExists(format!("block object {}", obj))
                }
                _ => KvsnsError::Io(e),
            })?;
        Ok(())
    }

    fn exists(&self, obj: &str) -> Result<bool> {
        Ok(self.object_path(obj)?.is_file())
    }

    fn remove(&self, obj: &str) -> Result<()> {
        fs::remove_file(self.object_path(obj)?).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KvsnsError::NotFound(format!("block object {}", obj)),
            _ => KvsnsError::Io(e),
        })
    }

    fn shrink(&self, obj: &str, len: u64) -> Result<()> {
        self.check_aligned(len, 0)?;
        let file = self.open_existing(obj, true)?;
        if file.metadata()?.len() > len {
            file.set_len(len)?;
        }
        Ok(())
    }
}
