//! MemTable implementation
//!
//! BTreeMap-based in-memory table with RwLock for concurrency. Holds the
//! whole live key space of a `LocalKvStore`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::wal::Operation;

use super::pattern;

/// Ordered in-memory key space
pub struct MemTable {
    /// Sorted keys, so scans come out ordered
    data: RwLock<BTreeMap<String, Vec<u8>>>,

    /// Approximate size in bytes (keys + values)
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get a value by key (read lock)
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Check for a key without copying its value
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Put a key-value pair (write lock), returning the new approximate size
    pub fn put(&self, key: String, value: Vec<u8>) -> usize {
        let mut data = self.data.write();
        self.put_locked(&mut data, key, value);
        self.size.load(Ordering::Relaxed)
    }

    /// Remove a key (write lock), returning whether it existed
    pub fn delete(&self, key: &str) -> bool {
        let mut data = self.data.write();
        self.delete_locked(&mut data, key)
    }

    /// Apply a batch under a single write lock so readers never see half of it
    pub fn apply(&self, operations: &[Operation]) {
        let mut data = self.data.write();
        for op in operations {
            match op {
                Operation::Put { key, value } => {
                    self.put_locked(&mut data, key.clone(), value.clone())
                }
                Operation::Delete { key } => {
                    self.delete_locked(&mut data, key);
                }
            }
        }
    }

    /// Keys matching `pattern` strictly after `after`, at most `limit` of them.
    ///
    /// The second value is true when more matching keys remain.
    pub fn scan(&self, pattern: &str, after: Option<&str>, limit: usize) -> (Vec<String>, bool) {
        let prefix = pattern::literal_prefix(pattern);
        let data = self.data.read();

        let lower = match after {
            Some(a) if a >= prefix => Bound::Excluded(a.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut keys = Vec::new();
        for key in data
            .range((lower, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
        {
            if !pattern::glob_match(pattern, key) {
                continue;
            }
            if keys.len() == limit {
                return (keys, true);
            }
            keys.push(key.clone());
        }
        (keys, false)
    }

    /// Copy of every entry in key order (for snapshots)
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.data.write().clear();
        self.size.store(0, Ordering::Relaxed);
    }

    fn put_locked(&self, data: &mut BTreeMap<String, Vec<u8>>, key: String, value: Vec<u8>) {
        let key_len = key.len();
        self.size.fetch_add(key_len + value.len(), Ordering::Relaxed);
        if let Some(old) = data.insert(key, value) {
            // the key was already counted once
            self.size.fetch_sub(key_len + old.len(), Ordering::Relaxed);
        }
    }

    fn delete_locked(&self, data: &mut BTreeMap<String, Vec<u8>>, key: &str) -> bool {
        match data.remove(key) {
            Some(old) => {
                self.size.fetch_sub(key.len() + old.len(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
