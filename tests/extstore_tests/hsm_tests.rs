//! Tests for the tiered backend and its HSM lifecycle
//!
//! These tests verify:
//! - archive / release / restore transitions and their data movement
//! - illegal transitions are refused without side effects
//! - implicit restore on read and write, and demotion on write
//! - attributes of released entries come from the persisted record
//! - the command-driven archive tier

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kvsns::extstore::{
    CacheState, CommandObjectStore, DirObjectStore, Extstore, ObjectStore, TieredStore,
};
use kvsns::kvs::{KvStore, LocalKvStore};
use kvsns::KvsnsError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _dir: TempDir,
    archive_dir: PathBuf,
    kv: Arc<dyn KvStore>,
    store: TieredStore,
}

fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let archive_dir = dir.path().join("archive");
    let archive = DirObjectStore::open(&archive_dir).unwrap();
    setup_with(dir, archive_dir, Box::new(archive))
}

fn setup_with(dir: TempDir, archive_dir: PathBuf, archive: Box<dyn ObjectStore>) -> Fixture {
    let kv: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
    let store = TieredStore::init(&dir.path().join("cache"), archive, Arc::clone(&kv)).unwrap();
    Fixture {
        _dir: dir,
        archive_dir,
        kv,
        store,
    }
}

fn create_with(fx: &Fixture, id: u64, content: &[u8]) {
    let mut txn = fx.kv.begin();
    fx.store.create(&mut txn, id).unwrap();
    txn.commit().unwrap();
    fx.store.write(id, 0, content).unwrap();
}

fn archived(fx: &Fixture, objid: &str) -> Option<Vec<u8>> {
    std::fs::read(fx.archive_dir.join(objid)).ok()
}

fn fast_exists(fx: &Fixture, id: u64) -> bool {
    fx.store.fast_path(id).exists()
}

// =============================================================================
// Transition Tests
// =============================================================================

#[test]
fn test_full_lifecycle() {
    let fx = setup();
    create_with(&fx, 3, b"tiered data");
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Cached);
    assert_eq!(fx.kv.get_string("3.cache_state").unwrap().as_deref(), Some("CACHED"));

    fx.store.archive(3).unwrap();
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Duplicated);
    assert_eq!(archived(&fx, "3").as_deref(), Some(&b"tiered data"[..]));
    assert!(fast_exists(&fx, 3));

    fx.store.release(3).unwrap();
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Released);
    assert!(!fast_exists(&fx, 3));

    fx.store.restore(3).unwrap();
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Duplicated);
    assert_eq!(fx.store.read(3, 0, 100).unwrap().data, b"tiered data");
}

#[test]
fn test_noop_transitions() {
    let fx = setup();
    create_with(&fx, 3, b"x");

    fx.store.restore(3).unwrap();
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Cached);

    fx.store.archive(3).unwrap();
    fx.store.archive(3).unwrap();
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Duplicated);

    fx.store.release(3).unwrap();
    fx.store.release(3).unwrap();
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Released);
}

#[test]
fn test_illegal_transitions() {
    let fx = setup();
    create_with(&fx, 3, b"x");

    let err = fx.store.release(3).unwrap_err();
    assert!(matches!(
        err,
        KvsnsError::IllegalStateTransition {
            from: CacheState::Cached,
            op: "release"
        }
    ));
    assert!(fast_exists(&fx, 3));

    fx.store.archive(3).unwrap();
    fx.store.release(3).unwrap();
    assert!(matches!(
        fx.store.archive(3),
        Err(KvsnsError::IllegalStateTransition { .. })
    ));
    assert_eq!(fx.store.state(3).unwrap(), CacheState::Released);
}

// =============================================================================
// Implicit Transitions
// =============================================================================

#[test]
fn test_read_of_released_restores() {
    let fx = setup();
    create_with(&fx, 4, b"cold data");
    fx.store.archive(4).unwrap();
    fx.store.release(4).unwrap();

    assert_eq!(fx.store.read(4, 5, 4).unwrap().data, b"data");
    assert_eq!(fx.store.state(4).unwrap(), CacheState::Duplicated);
}

#[test]
fn test_write_of_duplicated_goes_back_to_cached() {
    let fx = setup();
    create_with(&fx, 5, b"v1");
    fx.store.archive(5).unwrap();

    fx.store.write(5, 0, b"v2").unwrap();
    assert_eq!(fx.store.state(5).unwrap(), CacheState::Cached);
    // the archive copy is stale, so release must be refused again
    assert!(fx.store.release(5).is_err());
}

#[test]
fn test_write_of_released_restores_then_caches() {
    let fx = setup();
    create_with(&fx, 6, b"0123456789");
    fx.store.archive(6).unwrap();
    fx.store.release(6).unwrap();

    fx.store.write(6, 2, b"ab").unwrap();
    assert_eq!(fx.store.state(6).unwrap(), CacheState::Cached);
    assert_eq!(fx.store.read(6, 0, 10).unwrap().data, b"01ab456789");
}

// =============================================================================
// Attributes
// =============================================================================

#[test]
fn test_getattr_of_released_uses_persisted_record() {
    let fx = setup();
    create_with(&fx, 7, b"twelve bytes");
    let before = fx.store.getattr(7).unwrap();
    fx.store.archive(7).unwrap();
    fx.store.release(7).unwrap();

    let attr = fx.store.getattr(7).unwrap();
    assert_eq!(attr.size, 12);
    assert_eq!(attr.mtime, before.mtime);
    assert!(!fast_exists(&fx, 7));
}

#[test]
fn test_truncate_of_released_only_updates_record() {
    let fx = setup();
    create_with(&fx, 8, b"long content here");
    fx.store.archive(8).unwrap();
    fx.store.release(8).unwrap();

    assert_eq!(fx.store.truncate(8, 4).unwrap().size, 4);
    assert_eq!(fx.store.state(8).unwrap(), CacheState::Released);
    assert!(!fast_exists(&fx, 8));

    // the restored copy honours the new size
    assert_eq!(fx.store.read(8, 0, 100).unwrap().data, b"long");
}

// =============================================================================
// Deletion and Attach
// =============================================================================

#[test]
fn test_delete_removes_both_tiers() {
    let fx = setup();
    create_with(&fx, 9, b"bye");
    fx.store.archive(9).unwrap();

    fx.store.delete(9).unwrap();
    assert!(!fast_exists(&fx, 9));
    assert!(archived(&fx, "9").is_none());
    assert!(!fx.kv.exists("9.cache_state").unwrap());
    assert!(!fx.kv.exists("9.objid").unwrap());
    assert!(!fx.kv.exists("objid.9").unwrap());
}

#[test]
fn test_attach_archive_object() {
    let fx = setup();
    std::fs::write(fx.archive_dir.join("tape-0042"), b"from tape").unwrap();

    let mut txn = fx.kv.begin();
    let attr = fx.store.attach(&mut txn, 12, "tape-0042").unwrap();
    txn.commit().unwrap();

    assert_eq!(attr.size, 9);
    assert_eq!(fx.store.state(12).unwrap(), CacheState::Duplicated);
    fx.store.release(12).unwrap();
    assert_eq!(fx.store.read(12, 5, 4).unwrap().data, b"tape");
}

#[test]
fn test_attach_refuses_bound_object() {
    let fx = setup();
    std::fs::write(fx.archive_dir.join("shared"), b"only copy").unwrap();

    let mut txn = fx.kv.begin();
    fx.store.attach(&mut txn, 12, "shared").unwrap();
    txn.commit().unwrap();
    assert_eq!(fx.kv.get_string("objid.shared").unwrap().as_deref(), Some("12"));

    let mut txn = fx.kv.begin();
    let err = fx.store.attach(&mut txn, 13, "shared").unwrap_err();
    assert!(matches!(err, KvsnsError::AlreadyExists(_)));
    txn.discard();
    assert!(!fast_exists(&fx, 13));
    assert!(!fx.kv.exists("13.objid").unwrap());

    // objects owned by created entries are bound too
    create_with(&fx, 3, b"mine");
    let mut txn = fx.kv.begin();
    assert!(matches!(
        fx.store.attach(&mut txn, 14, "3"),
        Err(KvsnsError::AlreadyExists(_))
    ));
    drop(txn);

    // the single holder keeps its archive copy through release and restore
    fx.store.release(12).unwrap();
    assert_eq!(fx.store.read(12, 0, 100).unwrap().data, b"only copy");

    fx.store.delete(12).unwrap();
    assert!(archived(&fx, "shared").is_none());
    assert!(!fx.kv.exists("objid.shared").unwrap());
}

// =============================================================================
// Command Archive Tier
// =============================================================================

#[cfg(unix)]
fn command_archive(archive_dir: &Path) -> CommandObjectStore {
    std::fs::create_dir_all(archive_dir).unwrap();
    let target = format!("{}/{{objid}}", archive_dir.display());
    CommandObjectStore::new(
        vec!["cp".into(), "{path}".into(), target.clone()],
        vec!["cp".into(), target.clone(), "{path}".into()],
        vec!["rm".into(), target],
    )
    .unwrap()
}

#[cfg(unix)]
#[test]
fn test_command_archive_lifecycle() {
    let dir = TempDir::new().unwrap();
    let archive_dir = dir.path().join("cmd-archive");
    let archive = command_archive(&archive_dir);
    let fx = setup_with(dir, archive_dir, Box::new(archive));

    create_with(&fx, 3, b"via commands");
    fx.store.archive(3).unwrap();
    assert_eq!(archived(&fx, "3").as_deref(), Some(&b"via commands"[..]));

    fx.store.release(3).unwrap();
    assert_eq!(fx.store.read(3, 4, 8).unwrap().data, b"commands");

    fx.store.delete(3).unwrap();
    assert!(archived(&fx, "3").is_none());
}

#[cfg(unix)]
#[test]
fn test_command_failure_is_backend_error() {
    let dir = TempDir::new().unwrap();
    let archive_dir = dir.path().join("cmd-archive");
    let archive = command_archive(&archive_dir);

    let err = archive.get("never-stored", &dir.path().join("out")).unwrap_err();
    assert!(matches!(err, KvsnsError::Backend { retryable: false, .. }));
}

#[test]
fn test_command_store_requires_commands() {
    assert!(matches!(
        CommandObjectStore::new(vec![], vec!["true".into()], vec!["true".into()]),
        Err(KvsnsError::Config(_))
    ));
}
