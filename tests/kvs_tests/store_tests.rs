//! Tests for the KV substrate
//!
//! These tests verify:
//! - Basic get/set/delete and counters
//! - Glob enumeration and pagination
//! - Transactions: read-your-writes, commit, discard, serialization
//! - Durability across reopen (WAL replay and snapshots)

use std::sync::Arc;
use std::thread;

use kvsns::config::WalSyncStrategy;
use kvsns::kvs::{KvStore, LocalKvStore, WriteBatch};
use kvsns::KvsnsError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_durable(dir: &TempDir) -> LocalKvStore {
    LocalKvStore::open_dir(dir.path(), WalSyncStrategy::EveryWrite, 1024 * 1024).unwrap()
}

fn seed(store: &dyn KvStore, keys: &[&str]) {
    for key in keys {
        store.set_string(key, "x").unwrap();
    }
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_get_delete() {
    let store = LocalKvStore::in_memory();

    store.set_string("2.stat", "root").unwrap();
    assert_eq!(store.get_string("2.stat").unwrap().as_deref(), Some("root"));
    assert!(store.exists("2.stat").unwrap());

    assert!(store.delete("2.stat").unwrap());
    assert!(!store.delete("2.stat").unwrap());
    assert_eq!(store.get("2.stat").unwrap(), None);
}

#[test]
fn test_incr() {
    let store = LocalKvStore::in_memory();
    assert_eq!(store.incr("counter").unwrap(), 1);
    assert_eq!(store.incr("counter").unwrap(), 2);

    store.set_string("seeded", "3").unwrap();
    assert_eq!(store.incr("seeded").unwrap(), 4);

    store.set_string("text", "abc").unwrap();
    assert!(matches!(store.incr("text"), Err(KvsnsError::InvalidArgument(_))));
}

#[test]
fn test_concurrent_incr_is_atomic() {
    let store = Arc::new(LocalKvStore::in_memory());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..100)
                    .map(|_| store.incr("ino").unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 800);
    assert_eq!(store.get_string("ino").unwrap().as_deref(), Some("800"));
}

// =============================================================================
// Enumeration
// =============================================================================

#[test]
fn test_scan_matches_glob() {
    let store = LocalKvStore::in_memory();
    seed(&store, &["3.dentries.a", "3.dentries.b", "3.stat", "30.dentries.c", "4.dentries.d"]);

    let keys = store.scan_all("3.dentries.*").unwrap();
    assert_eq!(keys, vec!["3.dentries.a", "3.dentries.b"]);

    assert_eq!(store.count("*.stat").unwrap(), 1);
    assert_eq!(store.scan_all("?.dentries.?").unwrap().len(), 3);
}

#[test]
fn test_scan_pagination() {
    let store = LocalKvStore::in_memory();
    for i in 0..25 {
        store.set_string(&format!("5.xattr.attr{:02}", i), "v").unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = store.scan("5.xattr.*", cursor.as_deref(), 10).unwrap();
        pages += 1;
        seen.extend(page.keys);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 25);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert!(store.scan("*", None, 0).is_err());
}

// =============================================================================
// Transactions
// =============================================================================

#[test]
fn test_transaction_commit_and_read_your_writes() {
    let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
    store.set_string("old", "1").unwrap();

    let mut txn = store.begin();
    txn.set_string("new", "2");
    txn.delete("old");
    assert_eq!(txn.get_string("new").unwrap().as_deref(), Some("2"));
    assert!(!txn.exists("old").unwrap());
    assert_eq!(txn.scan_all("*").unwrap(), vec!["new"]);

    // not visible outside before commit
    assert!(!store.exists("new").unwrap());
    txn.commit().unwrap();

    assert!(store.exists("new").unwrap());
    assert!(!store.exists("old").unwrap());
}

#[test]
fn test_dropped_transaction_is_discarded() {
    let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
    {
        let mut txn = store.begin();
        txn.set_string("ghost", "boo");
    }
    assert!(!store.exists("ghost").unwrap());

    let mut txn = store.begin();
    txn.set_string("ghost", "boo");
    txn.discard();
    assert!(!store.exists("ghost").unwrap());
}

#[test]
fn test_transactions_are_serialized() {
    let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
    store.set_string("balance", "0").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut txn = store.begin();
                    let n: u64 = txn.get_string("balance").unwrap().unwrap().parse().unwrap();
                    txn.set_string("balance", &(n + 1).to_string());
                    txn.commit().unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.get_string("balance").unwrap().as_deref(), Some("200"));
}

#[test]
fn test_any_match_sees_pending_deletes() {
    let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
    store.set_string("7.dentries.only", "8").unwrap();

    let mut txn = store.begin();
    assert!(txn.any_match("7.dentries.*").unwrap());
    txn.delete("7.dentries.only");
    assert!(!txn.any_match("7.dentries.*").unwrap());
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_reopen_replays_wal() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_durable(&dir);
        store.set_string("a", "1").unwrap();
        let mut batch = WriteBatch::new();
        batch.put("b", b"2".to_vec());
        batch.put("c", b"3".to_vec());
        batch.delete("a");
        store.apply(batch).unwrap();
        store.incr("ino_counter").unwrap();
        // dropped without close: only the WAL holds the data
    }

    let store = open_durable(&dir);
    assert_eq!(store.get("a").unwrap(), None);
    assert_eq!(store.get_string("b").unwrap().as_deref(), Some("2"));
    assert_eq!(store.get_string("c").unwrap().as_deref(), Some("3"));
    assert_eq!(store.incr("ino_counter").unwrap(), 2);
}

#[test]
fn test_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_durable(&dir);
        for i in 0..100 {
            store.set(&format!("key{:03}", i), &[i as u8; 16]).unwrap();
        }
        store.close().unwrap();
    }
    assert!(dir.path().join("snapshot.kvs").exists());

    let store = open_durable(&dir);
    assert_eq!(store.key_count(), 100);
    assert_eq!(store.get("key042").unwrap(), Some(vec![42u8; 16]));
    assert_eq!(store.wal_len(), 0);
}

#[test]
fn test_reopen_replays_wal_past_snapshot() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_durable(&dir);
        store.set_string("old", "snap").unwrap();
        store.set_string("both", "snap").unwrap();
        store.checkpoint().unwrap();
        store.set_string("both", "wal").unwrap();
        store.set_string("new", "wal").unwrap();
    }

    let store = open_durable(&dir);
    assert_eq!(store.get_string("old").unwrap().as_deref(), Some("snap"));
    assert_eq!(store.get_string("both").unwrap().as_deref(), Some("wal"));
    assert_eq!(store.get_string("new").unwrap().as_deref(), Some("wal"));

    // records written after the replay survive another restart
    store.set_string("later", "1").unwrap();
    drop(store);
    let store = open_durable(&dir);
    assert_eq!(store.key_count(), 4);
    assert_eq!(store.get_string("both").unwrap().as_deref(), Some("wal"));
}

#[test]
fn test_threshold_triggers_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = LocalKvStore::open_dir(dir.path(), WalSyncStrategy::EveryWrite, 512).unwrap();
    for i in 0..50 {
        store.set(&format!("k{}", i), &[0u8; 64]).unwrap();
    }
    assert!(store.wal_len() < 512);
    drop(store);

    let store = open_durable(&dir);
    assert_eq!(store.key_count(), 50);
}
