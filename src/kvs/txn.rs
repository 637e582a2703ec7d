//! Transactions
//!
//! A transaction buffers mutations and applies them as one batch on
//! commit. It holds the store's transaction lock for its whole lifetime,
//! so read-modify-write sequences inside it cannot interleave with another
//! transaction. Dropping an uncommitted transaction discards it.

use std::collections::BTreeMap;

use parking_lot::MutexGuard;

use crate::error::Result;

use super::{decode_string, pattern, KvStore, WriteBatch};

/// A best-effort all-or-nothing bracket around a group of mutations
pub struct Transaction<'a> {
    store: &'a dyn KvStore,

    /// Held until commit/discard
    _guard: MutexGuard<'a, ()>,

    /// Buffered writes; `None` marks a delete
    pending: BTreeMap<String, Option<Vec<u8>>>,

    finished: bool,
}

impl<'a> Transaction<'a> {
    /// Begin a transaction, waiting for any other one to finish
    pub fn begin(store: &'a dyn KvStore) -> Self {
        let guard = store.transaction_lock().lock();
        Self {
            store,
            _guard: guard,
            pending: BTreeMap::new(),
            finished: false,
        }
    }

    /// Read a value, seeing this transaction's own writes
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.store.get(key),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key)?.map(decode_string).transpose()
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        match self.pending.get(key) {
            Some(value) => Ok(value.is_some()),
            None => self.store.exists(key),
        }
    }

    /// Buffer a write
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.pending.insert(key.into(), Some(value.into()));
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: &str) {
        self.set(key, value.as_bytes().to_vec());
    }

    /// Buffer a delete
    pub fn delete(&mut self, key: impl Into<String>) {
        self.pending.insert(key.into(), None);
    }

    /// Keys matching `pattern`, committed state merged with buffered writes
    pub fn scan_all(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .scan_all(pattern)?
            .into_iter()
            .filter(|k| !matches!(self.pending.get(k), Some(None)))
            .collect();

        for (key, value) in &self.pending {
            if value.is_some() && pattern::glob_match(pattern, key) && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Whether any key matches `pattern`
    pub fn any_match(&self, pattern: &str) -> Result<bool> {
        if self
            .pending
            .iter()
            .any(|(k, v)| v.is_some() && pattern::glob_match(pattern, k))
        {
            return Ok(true);
        }

        let mut cursor: Option<String> = None;
        loop {
            let page = self.store.scan(pattern, cursor.as_deref(), 16)?;
            if page
                .keys
                .iter()
                .any(|k| !matches!(self.pending.get(k), Some(None)))
            {
                return Ok(true);
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(false),
            }
        }
    }

    /// Number of buffered mutations
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every buffered mutation as one atomic batch
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        for (key, value) in std::mem::take(&mut self.pending) {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        tracing::trace!("Committing transaction with {} mutations", batch.len());
        self.store.apply(batch)
    }

    /// Drop every buffered mutation
    pub fn discard(mut self) {
        self.finished = true;
        self.pending.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            tracing::debug!(
                "Discarding uncommitted transaction ({} mutations)",
                self.pending.len()
            );
        }
    }
}
