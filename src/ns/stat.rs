//! Entry attributes
//!
//! ## Record Format (78 bytes, little-endian)
//! ```text
//! ┌─────────┬──────┬───────┬─────┬─────┬──────┬────────┬─────┬─────────┬─────────┬─────────┐
//! │ VERSION │ MODE │ NLINK │ UID │ GID │ SIZE │ BLOCKS │ INO │  ATIME  │  MTIME  │  CTIME  │
//! │ u16     │ u32  │ u32   │ u32 │ u32 │ u64  │ u64    │ u64 │ i64+u32 │ i64+u32 │ i64+u32 │
//! └─────────┴──────┴───────┴─────┴─────┴──────┴────────┴─────┴─────────┴─────────┴─────────┘
//! ```

use bitflags::bitflags;

use crate::error::{KvsnsError, Result};
use crate::extstore::DataAttr;
use crate::types::{EntryId, Timespec};

/// Current layout version
pub const STAT_VERSION: u16 = 1;

/// Encoded size of a stat record
pub const STAT_RECORD_SIZE: usize = 78;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// Permission bits, including setuid/setgid/sticky
pub const PERM_MASK: u32 = 0o7777;

/// Unit of the `blocks` field
const BLOCK_UNIT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Dir,
    File,
    Symlink,
}

impl EntryType {
    pub fn type_bits(&self) -> u32 {
        match self {
            EntryType::Dir => S_IFDIR,
            EntryType::File => S_IFREG,
            EntryType::Symlink => S_IFLNK,
        }
    }

    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFDIR => Some(EntryType::Dir),
            S_IFREG => Some(EntryType::File),
            S_IFLNK => Some(EntryType::Symlink),
            _ => None,
        }
    }
}

bitflags! {
    /// Which fields `setattr` applies
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttrMask: u32 {
        const MODE = 1 << 0;
        const UID = 1 << 1;
        const GID = 1 << 2;
        const SIZE = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
        const CTIME = 1 << 6;
    }
}

/// POSIX-style attributes of an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub ino: EntryId,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl Stat {
    /// Attributes of a freshly created entry
    pub fn new(ino: EntryId, kind: EntryType, perm: u32, uid: u32, gid: u32) -> Self {
        let now = Timespec::now();
        Self {
            mode: kind.type_bits() | (perm & PERM_MASK),
            nlink: if kind == EntryType::Dir { 2 } else { 1 },
            uid,
            gid,
            size: 0,
            blocks: 0,
            ino,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        EntryType::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// Content changed
    pub fn touch(&mut self, now: Timespec) {
        self.mtime = now;
        self.ctime = now;
    }

    /// Take size and data timestamps from the backend
    pub fn merge_data(&mut self, attr: &DataAttr) {
        self.size = attr.size;
        self.blocks = attr.size.div_ceil(BLOCK_UNIT);
        self.mtime = attr.mtime;
        self.ctime = self.ctime.max(attr.ctime);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STAT_RECORD_SIZE);
        buf.extend_from_slice(&STAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&self.nlink.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.blocks.to_le_bytes());
        buf.extend_from_slice(&self.ino.to_le_bytes());
        for ts in [self.atime, self.mtime, self.ctime] {
            buf.extend_from_slice(&ts.sec.to_le_bytes());
            buf.extend_from_slice(&ts.nsec.to_le_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STAT_RECORD_SIZE {
            return Err(KvsnsError::Corrupted(format!(
                "Stat record is {} bytes, expected {}",
                bytes.len(),
                STAT_RECORD_SIZE
            )));
        }

        let mut r = FieldReader { bytes, pos: 0 };
        let version = u16::from_le_bytes(r.take());
        if version != STAT_VERSION {
            return Err(KvsnsError::Corrupted(format!(
                "Unsupported stat record version {}",
                version
            )));
        }

        let mode = u32::from_le_bytes(r.take());
        let nlink = u32::from_le_bytes(r.take());
        let uid = u32::from_le_bytes(r.take());
        let gid = u32::from_le_bytes(r.take());
        let size = u64::from_le_bytes(r.take());
        let blocks = u64::from_le_bytes(r.take());
        let ino = u64::from_le_bytes(r.take());
        let atime = r.timespec();
        let mtime = r.timespec();
        let ctime = r.timespec();

        Ok(Self {
            mode,
            nlink,
            uid,
            gid,
            size,
            blocks,
            ino,
            atime,
            mtime,
            ctime,
        })
    }
}

/// Sequential fixed-width field reader over a length-checked record
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn timespec(&mut self) -> Timespec {
        let sec = i64::from_le_bytes(self.take());
        let nsec = u32::from_le_bytes(self.take());
        Timespec::new(sec, nsec)
    }
}
