//! Tests for extended attributes
//!
//! These tests verify:
//! - set / get / list / remove round trips and list pagination
//! - CREATE and REPLACE existence requirements
//! - Name and value bounds
//! - Permission checks and ctime updates
//! - Attributes disappear with their entry

use kvsns::config::{BackendConfig, Config};
use kvsns::keys::{XATTR_NAME_MAX, XATTR_SIZE_MAX};
use kvsns::ns::{Cred, OpenFlags, OpenOwner, XattrFlag};
use kvsns::{EntryId, Kvsns, KvsnsError, ROOT_ID};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, Kvsns, EntryId) {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .volatile_kv()
        .backend(BackendConfig::Posix {
            root: dir.path().join("data"),
        })
        .build();
    let ns = Kvsns::start(config).unwrap();
    ns.init_root(true).unwrap();
    let (f, _) = ns.creat(&Cred::root(), ROOT_ID, "f", 0o644).unwrap();
    (dir, ns, f)
}

fn root() -> Cred {
    Cred::root()
}

fn set(ns: &Kvsns, id: EntryId, name: &str, value: &[u8]) {
    ns.setxattr(&root(), id, name, value, XattrFlag::Any).unwrap();
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_get() {
    let (_dir, ns, f) = setup();
    set(&ns, f, "user.color", b"blue");
    assert_eq!(ns.getxattr(&root(), f, "user.color").unwrap(), b"blue");

    // Any overwrites
    set(&ns, f, "user.color", b"red");
    assert_eq!(ns.getxattr(&root(), f, "user.color").unwrap(), b"red");

    // empty values are legal
    set(&ns, f, "user.empty", b"");
    assert!(ns.getxattr(&root(), f, "user.empty").unwrap().is_empty());
}

#[test]
fn test_get_missing() {
    let (_dir, ns, f) = setup();
    assert!(matches!(
        ns.getxattr(&root(), f, "user.nothing"),
        Err(KvsnsError::NotFound(_))
    ));
    assert!(matches!(
        ns.getxattr(&root(), 999, "user.nothing"),
        Err(KvsnsError::NotFound(_))
    ));
}

#[test]
fn test_list_pagination() {
    let (_dir, ns, f) = setup();
    for name in ["user.c", "user.a", "user.b", "trusted.z"] {
        set(&ns, f, name, b"v");
    }

    let all = ns.listxattr(&root(), f, 0, 100).unwrap();
    assert_eq!(all, vec!["trusted.z", "user.a", "user.b", "user.c"]);

    assert_eq!(ns.listxattr(&root(), f, 1, 2).unwrap(), vec!["user.a", "user.b"]);
    assert!(ns.listxattr(&root(), f, 4, 10).unwrap().is_empty());
}

#[test]
fn test_list_is_per_entry() {
    let (_dir, ns, f) = setup();
    let (g, _) = ns.creat(&root(), ROOT_ID, "g", 0o644).unwrap();
    set(&ns, f, "user.mine", b"1");
    set(&ns, g, "user.other", b"2");

    assert_eq!(ns.listxattr(&root(), f, 0, 10).unwrap(), vec!["user.mine"]);
    assert_eq!(ns.listxattr(&root(), g, 0, 10).unwrap(), vec!["user.other"]);
}

#[test]
fn test_create_and_replace_flags() {
    let (_dir, ns, f) = setup();

    assert!(matches!(
        ns.setxattr(&root(), f, "user.k", b"v", XattrFlag::Replace),
        Err(KvsnsError::NotFound(_))
    ));
    ns.setxattr(&root(), f, "user.k", b"v1", XattrFlag::Create).unwrap();
    assert!(matches!(
        ns.setxattr(&root(), f, "user.k", b"v2", XattrFlag::Create),
        Err(KvsnsError::AlreadyExists(_))
    ));
    ns.setxattr(&root(), f, "user.k", b"v3", XattrFlag::Replace).unwrap();
    assert_eq!(ns.getxattr(&root(), f, "user.k").unwrap(), b"v3");
}

#[test]
fn test_bounds() {
    let (_dir, ns, f) = setup();

    let longest = "x".repeat(XATTR_NAME_MAX);
    set(&ns, f, &longest, b"ok");
    let too_long = "x".repeat(XATTR_NAME_MAX + 1);
    assert!(matches!(
        ns.setxattr(&root(), f, &too_long, b"v", XattrFlag::Any),
        Err(KvsnsError::InvalidArgument(_))
    ));
    assert!(matches!(
        ns.setxattr(&root(), f, "", b"v", XattrFlag::Any),
        Err(KvsnsError::InvalidArgument(_))
    ));

    let biggest = vec![7u8; XATTR_SIZE_MAX];
    set(&ns, f, "user.big", &biggest);
    assert_eq!(ns.getxattr(&root(), f, "user.big").unwrap().len(), XATTR_SIZE_MAX);
    let err = ns
        .setxattr(&root(), f, "user.huge", &vec![0u8; XATTR_SIZE_MAX + 1], XattrFlag::Any)
        .unwrap_err();
    assert_eq!(err.errno(), 22);
}

#[test]
fn test_remove() {
    let (_dir, ns, f) = setup();
    set(&ns, f, "user.a", b"1");
    set(&ns, f, "user.b", b"2");

    ns.removexattr(&root(), f, "user.a").unwrap();
    assert_eq!(ns.listxattr(&root(), f, 0, 10).unwrap(), vec!["user.b"]);
    assert!(matches!(
        ns.removexattr(&root(), f, "user.a"),
        Err(KvsnsError::NotFound(_))
    ));
}

#[test]
fn test_remove_all() {
    let (_dir, ns, f) = setup();
    for i in 0..5 {
        set(&ns, f, &format!("user.{}", i), b"v");
    }
    assert_eq!(ns.remove_all_xattr(&root(), f).unwrap(), 5);
    assert!(ns.listxattr(&root(), f, 0, 10).unwrap().is_empty());
    assert_eq!(ns.remove_all_xattr(&root(), f).unwrap(), 0);

    // the entry itself is untouched
    assert_eq!(ns.lookup(&root(), ROOT_ID, "f").unwrap(), f);
}

// =============================================================================
// Permissions and Attributes
// =============================================================================

#[test]
fn test_permissions() {
    let (_dir, ns, f) = setup();
    let stranger = Cred::new(1000, 1000);
    set(&ns, f, "user.a", b"1");

    // 0644: others may read but not write
    assert_eq!(ns.getxattr(&stranger, f, "user.a").unwrap(), b"1");
    assert_eq!(ns.listxattr(&stranger, f, 0, 10).unwrap(), vec!["user.a"]);
    assert!(matches!(
        ns.setxattr(&stranger, f, "user.b", b"2", XattrFlag::Any),
        Err(KvsnsError::PermissionDenied)
    ));
    assert!(matches!(
        ns.removexattr(&stranger, f, "user.a"),
        Err(KvsnsError::PermissionDenied)
    ));

    let (private, _) = ns.creat(&root(), ROOT_ID, "private", 0o600).unwrap();
    assert!(matches!(
        ns.getxattr(&stranger, private, "user.a"),
        Err(KvsnsError::PermissionDenied)
    ));

    // an owner may always set attributes on its own entry
    let (own, _) = ns.creat(&stranger, ROOT_ID, "own", 0o400).unwrap();
    ns.setxattr(&stranger, own, "user.tag", b"mine", XattrFlag::Any).unwrap();
}

#[test]
fn test_set_bumps_ctime() {
    let (_dir, ns, f) = setup();
    let before = ns.getattr(&root(), f).unwrap();
    set(&ns, f, "user.a", b"1");
    let after = ns.getattr(&root(), f).unwrap();
    assert!(after.ctime >= before.ctime);
    assert_eq!(after.mtime, before.mtime);
}

// =============================================================================
// Lifetime
// =============================================================================

#[test]
fn test_xattrs_die_with_entry() {
    let (_dir, ns, f) = setup();
    set(&ns, f, "user.a", b"1");
    set(&ns, f, "user.b", b"2");

    ns.unlink(&root(), ROOT_ID, "f").unwrap();
    assert!(ns.kv().scan_all(&format!("{}.xattr.*", f)).unwrap().is_empty());
}

#[test]
fn test_xattrs_survive_until_last_close() {
    let (_dir, ns, f) = setup();
    set(&ns, f, "user.a", b"1");
    let h = ns
        .open(&root(), f, OpenFlags::READ, OpenOwner::new(1, 1))
        .unwrap();

    ns.unlink(&root(), ROOT_ID, "f").unwrap();
    assert_eq!(ns.getxattr(&root(), f, "user.a").unwrap(), b"1");

    ns.close(&h).unwrap();
    assert!(matches!(
        ns.getxattr(&root(), f, "user.a"),
        Err(KvsnsError::NotFound(_))
    ));
}
