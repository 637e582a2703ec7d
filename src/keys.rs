//! Persisted key layout
//!
//! Every facet of entry `N` lives under the `N.` prefix:
//!
//! | key                     | value                                  |
//! |-------------------------|----------------------------------------|
//! | `N.stat`                | packed stat record                     |
//! | `N.parentdir`           | versioned list of parent ids           |
//! | `N.dentries.<name>`     | child id (decimal)                     |
//! | `N.link`                | symlink target                         |
//! | `N.xattr.<name>`        | attribute value                        |
//! | `N.objid`               | backend object reference               |
//! | `N.data`                | backend-persisted data attributes      |
//! | `N.cache_state`         | HSM state                              |
//! | `N.openowner`           | versioned list of (pid, tid) owners    |
//! | `N.opened_and_deleted`  | presence flag                          |
//!
//! plus the global id counter `ino_counter` and one reverse index per
//! bound backend object, `objid.<objid>`, holding the id that owns it.

use crate::error::{KvsnsError, Result};
use crate::EntryId;

/// Global id allocator
pub const INO_COUNTER: &str = "ino_counter";

/// Longest entry name, in bytes
pub const NAME_MAX: usize = 255;

/// Longest symlink target, in bytes
pub const LINK_MAX: usize = 4096;

/// Longest extended attribute name, in bytes
pub const XATTR_NAME_MAX: usize = 255;

/// Largest extended attribute value, in bytes
pub const XATTR_SIZE_MAX: usize = 64 * 1024;

pub fn stat(id: EntryId) -> String {
    format!("{}.stat", id)
}

pub fn parentdir(id: EntryId) -> String {
    format!("{}.parentdir", id)
}

pub fn dentry(dir: EntryId, name: &str) -> String {
    format!("{}.dentries.{}", dir, name)
}

pub fn dentry_prefix(dir: EntryId) -> String {
    format!("{}.dentries.", dir)
}

pub fn dentries_pattern(dir: EntryId) -> String {
    format!("{}.dentries.*", dir)
}

pub fn link(id: EntryId) -> String {
    format!("{}.link", id)
}

pub fn xattr(id: EntryId, name: &str) -> String {
    format!("{}.xattr.{}", id, name)
}

pub fn xattr_prefix(id: EntryId) -> String {
    format!("{}.xattr.", id)
}

pub fn xattrs_pattern(id: EntryId) -> String {
    format!("{}.xattr.*", id)
}

pub fn objid(id: EntryId) -> String {
    format!("{}.objid", id)
}

/// Reverse index: which entry holds a backend object
pub fn objid_owner(objid: &str) -> String {
    format!("objid.{}", objid)
}

pub fn data(id: EntryId) -> String {
    format!("{}.data", id)
}

pub fn cache_state(id: EntryId) -> String {
    format!("{}.cache_state", id)
}

pub fn openowner(id: EntryId) -> String {
    format!("{}.openowner", id)
}

pub fn opened_and_deleted(id: EntryId) -> String {
    format!("{}.opened_and_deleted", id)
}

/// Pattern over every stat key; callers must still filter on a numeric prefix
pub const STAT_PATTERN: &str = "*.stat";

/// Entry id of a `N.stat` key, `None` for anything else
pub fn stat_owner(key: &str) -> Option<EntryId> {
    key.strip_suffix(".stat")?.parse().ok()
}

/// Check an entry name against the namespace rules
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KvsnsError::InvalidArgument("Empty name".to_string()));
    }
    if name.len() > NAME_MAX {
        return Err(KvsnsError::InvalidArgument(format!(
            "Name is {} bytes long (max {})",
            name.len(),
            NAME_MAX
        )));
    }
    if name == "." || name == ".." {
        return Err(KvsnsError::InvalidArgument(format!("Reserved name {:?}", name)));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(KvsnsError::InvalidArgument(format!(
            "Name {:?} contains '/' or NUL",
            name
        )));
    }
    Ok(())
}

/// Check an extended attribute name
pub fn validate_xattr_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > XATTR_NAME_MAX || name.contains('\0') {
        return Err(KvsnsError::InvalidArgument(format!(
            "Invalid xattr name {:?} (1..={} bytes, no NUL)",
            name, XATTR_NAME_MAX
        )));
    }
    Ok(())
}

/// Parse a decimal entry id stored as a value
pub fn parse_id(bytes: &[u8]) -> Result<EntryId> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| KvsnsError::Corrupted(format!("Not an entry id: {:?}", bytes)))
}
