//! Caller credentials and permission checks

use bitflags::bitflags;

use crate::error::{KvsnsError, Result};

use super::Stat;

/// Identity of the caller of a namespace operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cred {
    pub uid: u32,
    pub gid: u32,
}

impl Cred {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Superuser; passes every permission check
    pub fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

bitflags! {
    /// Requested access, in `rwx` bit order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const READ = 0o4;
        const WRITE = 0o2;
        const EXEC = 0o1;
    }
}

/// Check `access` against the owner, group or other bits of `stat`
pub fn check_access(cred: &Cred, stat: &Stat, access: Access) -> Result<()> {
    if cred.is_root() {
        return Ok(());
    }

    let mode = stat.mode;
    let granted = if cred.uid == stat.uid {
        (mode >> 6) & 0o7
    } else if cred.gid == stat.gid {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };

    if granted & access.bits() == access.bits() {
        Ok(())
    } else {
        Err(KvsnsError::PermissionDenied)
    }
}

/// Metadata changes: the owner may always make them, others need write access
pub fn check_owner_or_write(cred: &Cred, stat: &Stat) -> Result<()> {
    if cred.uid == stat.uid {
        return Ok(());
    }
    check_access(cred, stat, Access::WRITE)
}
