//! Block-Aligned I/O Module
//!
//! Turns arbitrary byte-range reads and writes into whole-block transfers
//! for backends whose primitive only moves fixed-size blocks.
//!
//! ## Algorithm
//! ```text
//!   Lx1        x1      Ux1               Lx2      x2     Ux2
//!    │  keep   │ head   │      body       │ tail   │ keep │
//!    ├─────────┼────────┼─────────────────┼────────┼──────┤
//!    │ leading block    │ aligned blocks  │ trailing block │
//! ```
//! - A request inside a single block is one read-modify-write.
//! - Otherwise the aligned body moves in one bulk transfer, and each
//!   unaligned edge is a read-modify-write of its boundary block that
//!   preserves the bytes outside the request.
//! - Writes retry on transient backend errors, with a fixed back-off.

mod aligned;
mod device;
mod span;

use crate::error::Result;

pub use aligned::AlignedIo;
pub use device::FileBlockDevice;
pub use span::BlockSpan;

/// A transport that can only move whole, aligned blocks
///
/// `offset` is always a multiple of `block_size()` and buffer lengths are
/// whole multiples of it.
pub trait BlockTransport: Send + Sync {
    /// Transfer unit in bytes
    fn block_size(&self) -> u64;

    /// Fill `buf` from the object starting at `offset`; unwritten space reads as zeros
    fn read_blocks(&self, obj: &str, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` to the object starting at `offset`
    fn write_blocks(&self, obj: &str, offset: u64, data: &[u8]) -> Result<()>;

    /// Create an empty object
    fn create(&self, obj: &str) -> Result<()>;

    /// Whether the object exists
    fn exists(&self, obj: &str) -> Result<bool>;

    /// Remove the object
    fn remove(&self, obj: &str) -> Result<()>;

    /// Drop every block at or past `len` (a block multiple)
    fn shrink(&self, obj: &str, len: u64) -> Result<()>;
}
