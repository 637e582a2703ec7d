//! KV Substrate Module
//!
//! The key/value contract the namespace and the backends store all of their
//! metadata in, plus the in-process implementation.
//!
//! ## Responsibilities
//! - String/binary get and set, existence, delete
//! - Atomic counters (entry id allocation)
//! - Ordered glob enumeration with pagination
//! - Transactions: a buffered, all-or-nothing bracket around mutations
//!
//! ## Consistency Model
//! - Transactions are serialized against each other: `begin` takes the
//!   store-wide transaction lock and holds it until commit or discard.
//! - A committed batch is applied atomically (one WAL record, one memtable
//!   write section). Readers never observe half of a batch.
//! - Single-key writes outside a transaction are atomic per key.
//! - A thread must not begin a second transaction while holding one.

mod local;
mod memtable;
pub mod pattern;
mod snapshot;
mod txn;

use parking_lot::Mutex;

use crate::error::{KvsnsError, Result};
use crate::wal::Operation;

pub use local::LocalKvStore;
pub use memtable::MemTable;
pub use snapshot::Snapshot;
pub use txn::Transaction;

/// Page size used by the `scan_all` helpers
const SCAN_PAGE: usize = 256;

/// One page of an enumeration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Matching keys in ascending order
    pub keys: Vec<String>,

    /// Resume point for the next page, `None` once exhausted
    pub cursor: Option<String>,
}

/// A group of mutations applied together
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    operations: Vec<Operation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.operations.push(Operation::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.operations.push(Operation::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

/// The KV substrate contract
///
/// Implementations are shared between threads behind an `Arc`; every
/// method takes `&self`.
pub trait KvStore: Send + Sync {
    /// Fetch a value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically add one to a decimal counter and return the new value.
    /// A missing counter starts at zero.
    fn incr(&self, key: &str) -> Result<u64>;

    /// Enumerate keys matching `pattern` that sort after `cursor`
    fn scan(&self, pattern: &str, cursor: Option<&str>, count: usize) -> Result<ScanPage>;

    /// Apply a batch atomically
    fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Lock serializing transactions
    fn transaction_lock(&self) -> &Mutex<()>;

    // =========================================================================
    // Provided helpers
    // =========================================================================

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key)?.map(decode_string).transpose()
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, value.as_bytes())
    }

    /// Every key matching `pattern`, across all pages
    fn scan_all(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.scan(pattern, cursor.as_deref(), SCAN_PAGE)?;
            keys.extend(page.keys);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(keys),
            }
        }
    }

    /// Number of keys matching `pattern`
    fn count(&self, pattern: &str) -> Result<usize> {
        Ok(self.scan_all(pattern)?.len())
    }
}

impl<'s> dyn KvStore + 's {
    /// Open a transaction on this store
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::begin(self)
    }
}

/// Interpret a stored value as UTF-8 text
pub(crate) fn decode_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| KvsnsError::Corrupted(format!("Value is not UTF-8: {}", e)))
}
