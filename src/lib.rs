//! # kvsns
//!
//! A POSIX-like namespace kept in a key/value store, with file data
//! delegated to a pluggable storage backend:
//! - Directories, files, symlinks, hard links and extended attributes
//! - Transactional metadata updates over a WAL-backed KV substrate
//! - Tiered data with a CACHED / DUPLICATED / RELEASED lifecycle
//! - Block-aligned partial I/O for whole-block backends
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Namespace (Kvsns)                         │
//! │        lookup · create · link · rename · open · xattr        │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │ metadata                      │ data
//!                ▼                               ▼
//!   ┌─────────────────────────┐     ┌─────────────────────────────┐
//!   │     KV Substrate        │     │      Extstore backend       │
//!   │ MemTable + WAL + Snapshot│◀───│ posix │ tiered │ block      │
//!   └─────────────────────────┘     └───────────┬────────┬────────┘
//!                                               │        │
//!                                    ObjectStore ▼        ▼ AlignedIo
//!                                      (archive tier)  (BlockTransport)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;
pub mod keys;

pub mod wal;
pub mod kvs;
pub mod blockio;
pub mod extstore;
pub mod ns;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvsnsError, Result};
pub use config::Config;
pub use types::{EntryId, Timespec, ROOT_ID};
pub use ns::Kvsns;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvsns
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
