//! Snapshot files
//!
//! A snapshot is a full, sorted dump of the key space, written atomically
//! (temp file + rename) so the WAL can be truncated behind it.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (22 bytes)                                       │
//! │   Magic "KVSN" (4) | Version u16 (2) | Count u64 (8)    │
//! │   Last LSN u64 (8)                                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry ...                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                        │
//! │   DataCRC: u32 (4) | Padding (4)                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{KvsnsError, Result};

/// Magic bytes identifying a kvsns snapshot file
const MAGIC: &[u8; 4] = b"KVSN";

/// Current snapshot format version
const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Count (8) + Last LSN (8)
const HEADER_SIZE: usize = 22;

/// Footer size: DataCRC (4) + Padding (4)
const FOOTER_SIZE: usize = 8;

/// Contents of a loaded snapshot
#[derive(Debug)]
pub struct Snapshot {
    /// Highest WAL LSN folded into this snapshot
    pub last_lsn: u64,

    /// Entries in key order
    pub entries: Vec<(String, Vec<u8>)>,
}

/// Write a snapshot of `entries` (already sorted) to `path`
pub fn write(path: &Path, last_lsn: u64, entries: &[(String, Vec<u8>)]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(entries.len() as u64).to_le_bytes())?;
        writer.write_all(&last_lsn.to_le_bytes())?;

        let mut hasher = crc32fast::Hasher::new();
        for (key, value) in entries {
            let key_len = (key.len() as u32).to_le_bytes();
            let val_len = (value.len() as u32).to_le_bytes();
            for chunk in [&key_len[..], &val_len[..], key.as_bytes(), value.as_slice()] {
                writer.write_all(chunk)?;
                hasher.update(chunk);
            }
        }

        writer.write_all(&hasher.finalize().to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| KvsnsError::Io(e.into_error()))?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load and verify a snapshot
pub fn load(path: &Path) -> Result<Snapshot> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;

    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(KvsnsError::Corrupted(format!(
            "Snapshot {} too short: {} bytes",
            path.display(),
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(KvsnsError::Corrupted(format!(
            "Invalid snapshot magic: expected KVSN, got {:?}",
            &bytes[0..4]
        )));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(KvsnsError::Corrupted(format!(
            "Unsupported snapshot version: {}",
            version
        )));
    }

    let count = read_u64(&bytes, 6)?;
    let last_lsn = read_u64(&bytes, 14)?;

    let data_end = bytes.len() - FOOTER_SIZE;
    let data = &bytes[HEADER_SIZE..data_end];
    let stored_crc = read_u32(&bytes, data_end)?;
    let actual_crc = crc32fast::hash(data);
    if stored_crc != actual_crc {
        return Err(KvsnsError::Corrupted(format!(
            "Snapshot CRC mismatch: stored {:#010x}, computed {:#010x}",
            stored_crc, actual_crc
        )));
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut pos = 0usize;
    while pos < data.len() {
        let key_len = read_u32(data, pos)? as usize;
        let val_len = read_u32(data, pos + 4)? as usize;
        pos += 8;

        let key = data
            .get(pos..pos + key_len)
            .ok_or_else(|| truncated("key"))?;
        pos += key_len;
        let value = data
            .get(pos..pos + val_len)
            .ok_or_else(|| truncated("value"))?;
        pos += val_len;

        let key = String::from_utf8(key.to_vec())
            .map_err(|_| KvsnsError::Corrupted("Snapshot key is not UTF-8".to_string()))?;
        entries.push((key, value.to_vec()));
    }

    if entries.len() as u64 != count {
        return Err(KvsnsError::Corrupted(format!(
            "Snapshot entry count mismatch: header says {}, found {}",
            count,
            entries.len()
        )));
    }

    Ok(Snapshot { last_lsn, entries })
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64> {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes.get(at..at + 8).ok_or_else(|| truncated("u64"))?);
    Ok(u64::from_le_bytes(buf))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes.get(at..at + 4).ok_or_else(|| truncated("u32"))?);
    Ok(u32::from_le_bytes(buf))
}

fn truncated(what: &str) -> KvsnsError {
    KvsnsError::Corrupted(format!("Snapshot truncated while reading {}", what))
}
