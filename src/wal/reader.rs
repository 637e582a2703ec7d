//! WAL Reader
//!
//! Handles reading records from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{KvsnsError, Result};

use super::{WalEntry, HEADER_SIZE};

/// Reads records from the WAL file
pub struct WalReader {
    reader: BufReader<File>,

    /// Offset of the next unread record
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next record from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file, and `WalCorruption` for a
    /// partial or damaged record.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(KvsnsError::WalCorruption(format!(
                "Partial header at offset {}: {} of {} bytes",
                self.position, got, HEADER_SIZE
            )));
        }

        let (lsn, crc, len) = WalEntry::parse_header(&header)?;
        let mut payload = vec![0u8; len];
        let got = read_full(&mut self.reader, &mut payload)?;
        if got < len {
            return Err(KvsnsError::WalCorruption(format!(
                "Partial record at offset {}: {} of {} payload bytes",
                self.position, got, len
            )));
        }

        let entry = WalEntry::from_parts(lsn, crc, &payload)?;
        self.position += (HEADER_SIZE + len) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last record successfully read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all valid records
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Iterator over WAL records; stops after the first error
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
