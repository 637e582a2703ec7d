//! Aligned partial I/O
//!
//! Executes a `BlockSpan` plan against a `BlockTransport`.

use std::thread;

use crate::config::IoRetryPolicy;
use crate::error::{KvsnsError, Result};

use super::{BlockSpan, BlockTransport};

/// Byte-granular reads and writes over a whole-block transport
pub struct AlignedIo<'a, T: BlockTransport + ?Sized> {
    transport: &'a T,
    retry: IoRetryPolicy,
}

impl<'a, T: BlockTransport + ?Sized> AlignedIo<'a, T> {
    pub fn new(transport: &'a T, retry: IoRetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Write `data` at `offset`, returning the bytes written
    pub fn pwrite(&self, obj: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let bs = self.transport.block_size();
        let span = BlockSpan::new(offset, data.len() as u64, bs)?;
        if span.is_empty() {
            return Ok(0);
        }

        // Whole request inside one block: a single read-modify-write
        if span.is_insider() {
            let base = span.head_block();
            self.modify_block(obj, base, (span.start - base) as usize, data)?;
            tracing::trace!("pwrite {} insider block {} ({} bytes)", obj, base, data.len());
            return Ok(data.len());
        }

        let mut written = 0usize;

        if let Some(body) = span.body() {
            let from = (body.start - span.start) as usize;
            let to = (body.end - span.start) as usize;
            self.write_with_retry(obj, body.start, &data[from..to])?;
            written += to - from;
            tracing::trace!(
                "pwrite {} body [{}, {}) = {} blocks",
                obj,
                body.start,
                body.end,
                (body.end - body.start) / bs
            );
        }

        if let Some(head) = span.head() {
            let base = span.head_block();
            let n = (head.end - head.start) as usize;
            self.modify_block(obj, base, (head.start - base) as usize, &data[..n])?;
            written += n;
        }

        if let Some(tail) = span.tail() {
            let n = (tail.end - tail.start) as usize;
            let from = (tail.start - span.start) as usize;
            self.modify_block(obj, tail.start, 0, &data[from..from + n])?;
            written += n;
        }

        debug_assert_eq!(written, data.len());
        Ok(written)
    }

    /// Fill `buf` from `offset`, returning the bytes read
    pub fn pread(&self, obj: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let bs = self.transport.block_size();
        let span = BlockSpan::new(offset, buf.len() as u64, bs)?;
        if span.is_empty() {
            return Ok(0);
        }

        if span.is_insider() {
            let base = span.head_block();
            let block = self.read_block(obj, base)?;
            let from = (span.start - base) as usize;
            buf.copy_from_slice(&block[from..from + buf.len()]);
            return Ok(buf.len());
        }

        let mut read = 0usize;

        if let Some(body) = span.body() {
            let from = (body.start - span.start) as usize;
            let to = (body.end - span.start) as usize;
            self.transport.read_blocks(obj, body.start, &mut buf[from..to])?;
            read += to - from;
        }

        if let Some(head) = span.head() {
            let base = span.head_block();
            let block = self.read_block(obj, base)?;
            let n = (head.end - head.start) as usize;
            let from = (head.start - base) as usize;
            buf[..n].copy_from_slice(&block[from..from + n]);
            read += n;
        }

        if let Some(tail) = span.tail() {
            let block = self.read_block(obj, tail.start)?;
            let n = (tail.end - tail.start) as usize;
            let from = (tail.start - span.start) as usize;
            buf[from..from + n].copy_from_slice(&block[..n]);
            read += n;
        }

        Ok(read)
    }

    /// Read one block, splice `data` in at `within`, write it back
    fn modify_block(&self, obj: &str, base: u64, within: usize, data: &[u8]) -> Result<()> {
        let mut block = self.read_block(obj, base)?;
        block[within..within + data.len()].copy_from_slice(data);
        self.write_with_retry(obj, base, &block)
    }

    fn read_block(&self, obj: &str, base: u64) -> Result<Vec<u8>> {
        let mut block = vec![0u8; self.transport.block_size() as usize];
        self.transport.read_blocks(obj, base, &mut block)?;
        Ok(block)
    }

    fn write_with_retry(&self, obj: &str, offset: u64, data: &[u8]) -> Result<()> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.write_blocks(obj, offset, data) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        "Block write {}@{} failed (attempt {}/{}): {}",
                        obj,
                        offset,
                        attempt,
                        attempts,
                        e
                    );
                    attempt += 1;
                    thread::sleep(self.retry.backoff);
                }
                Err(e) if e.is_retryable() => {
                    return Err(KvsnsError::backend(format!(
                        "Block write {}@{} gave up after {} attempts: {}",
                        obj, offset, attempts, e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
