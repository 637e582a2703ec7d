//! Block span arithmetic
//!
//! Splits a byte range `[x1, x2)` into the pieces the aligned engine moves.

use std::ops::Range;

use crate::error::{KvsnsError, Result};

/// A byte range laid over a block grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// First byte of the request (x1)
    pub start: u64,

    /// One past the last byte (x2)
    pub end: u64,

    /// Block size (B)
    pub block_size: u64,
}

impl BlockSpan {
    /// Span `len` bytes from `offset` on a grid of `block_size`
    pub fn new(offset: u64, len: u64, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(KvsnsError::InvalidArgument(
                "Block size must be positive".to_string(),
            ));
        }
        let end = offset.checked_add(len).ok_or_else(|| {
            KvsnsError::InvalidArgument(format!("Range {}+{} overflows", offset, len))
        })?;
        Ok(Self {
            start: offset,
            end,
            block_size,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Start of the block containing `x`
    pub fn lower(&self, x: u64) -> u64 {
        x / self.block_size * self.block_size
    }

    /// Lx1: start of the leading block
    pub fn head_block(&self) -> u64 {
        self.lower(self.start)
    }

    /// Lx2: start of the block holding x2
    pub fn tail_block(&self) -> u64 {
        self.lower(self.end)
    }

    /// The whole request sits inside one block and leaves part of it untouched
    pub fn is_insider(&self) -> bool {
        !self.is_empty() && self.head_block() == self.tail_block()
    }

    /// `[Lio, Uio)`: the widest block-aligned range fully covered by the request
    pub fn body(&self) -> Option<Range<u64>> {
        if self.is_empty() || self.is_insider() {
            return None;
        }
        let lio = if self.start % self.block_size == 0 {
            self.start
        } else {
            self.head_block() + self.block_size
        };
        let uio = if self.end % self.block_size == 0 {
            self.end
        } else {
            self.tail_block()
        };
        (lio < uio).then_some(lio..uio)
    }

    /// `[x1, Ux1)` when x1 is not aligned
    pub fn head(&self) -> Option<Range<u64>> {
        if self.is_empty() || self.is_insider() || self.start % self.block_size == 0 {
            return None;
        }
        Some(self.start..self.head_block() + self.block_size)
    }

    /// `[Lx2, x2)` when x2 is not aligned
    pub fn tail(&self) -> Option<Range<u64>> {
        if self.is_empty() || self.is_insider() || self.end % self.block_size == 0 {
            return None;
        }
        Some(self.tail_block()..self.end)
    }
}
