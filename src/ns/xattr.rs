//! Extended attributes

use crate::error::{KvsnsError, Result};
use crate::keys;
use crate::kvs::Transaction;
use crate::types::{EntryId, Timespec};

use super::{check_access, check_owner_or_write, put_stat, txn_stat, Access, Cred, Kvsns};

/// Existence requirement of `setxattr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XattrFlag {
    /// Create or overwrite
    #[default]
    Any,

    /// Fail if the attribute exists
    Create,

    /// Fail if the attribute is missing
    Replace,
}

impl Kvsns {
    pub fn setxattr(
        &self,
        cred: &Cred,
        id: EntryId,
        name: &str,
        value: &[u8],
        flag: XattrFlag,
    ) -> Result<()> {
        keys::validate_xattr_name(name)?;
        if value.len() > keys::XATTR_SIZE_MAX {
            return Err(KvsnsError::InvalidArgument(format!(
                "Xattr value is {} bytes (max {})",
                value.len(),
                keys::XATTR_SIZE_MAX
            )));
        }

        let mut txn = self.kv.begin();
        let mut stat = txn_stat(&txn, id)?;
        check_owner_or_write(cred, &stat)?;

        let key = keys::xattr(id, name);
        let exists = txn.exists(&key)?;
        match flag {
            XattrFlag::Create if exists => {
                return Err(KvsnsError::AlreadyExists(format!("xattr {:?} of entry {}", name, id)))
            }
            XattrFlag::Replace if !exists => {
                return Err(KvsnsError::NotFound(format!("xattr {:?} of entry {}", name, id)))
            }
            _ => {}
        }

        txn.set(key, value);
        stat.ctime = Timespec::now();
        put_stat(&mut txn, &stat);
        txn.commit()
    }

    pub fn getxattr(&self, cred: &Cred, id: EntryId, name: &str) -> Result<Vec<u8>> {
        let stat = self.load_stat(id)?;
        check_access(cred, &stat, Access::READ)?;
        self.kv
            .get(&keys::xattr(id, name))?
            .ok_or_else(|| KvsnsError::NotFound(format!("xattr {:?} of entry {}", name, id)))
    }

    /// Attribute names in name order, `count` of them starting at `offset`
    pub fn listxattr(&self, cred: &Cred, id: EntryId, offset: usize, count: usize) -> Result<Vec<String>> {
        let stat = self.load_stat(id)?;
        check_access(cred, &stat, Access::READ)?;

        let prefix = keys::xattr_prefix(id);
        Ok(self
            .kv
            .scan_all(&keys::xattrs_pattern(id))?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .skip(offset)
            .take(count)
            .collect())
    }

    pub fn removexattr(&self, cred: &Cred, id: EntryId, name: &str) -> Result<()> {
        let mut txn = self.kv.begin();
        let mut stat = txn_stat(&txn, id)?;
        check_owner_or_write(cred, &stat)?;

        let key = keys::xattr(id, name);
        if !txn.exists(&key)? {
            return Err(KvsnsError::NotFound(format!("xattr {:?} of entry {}", name, id)));
        }
        txn.delete(key);
        stat.ctime = Timespec::now();
        put_stat(&mut txn, &stat);
        txn.commit()
    }

    /// Remove every attribute of an entry, returning how many were removed
    pub fn remove_all_xattr(&self, cred: &Cred, id: EntryId) -> Result<usize> {
        let mut txn = self.kv.begin();
        let mut stat = txn_stat(&txn, id)?;
        check_owner_or_write(cred, &stat)?;

        let removed = remove_all_in(&mut txn, id)?;
        if removed > 0 {
            stat.ctime = Timespec::now();
            put_stat(&mut txn, &stat);
        }
        txn.commit()?;
        Ok(removed)
    }
}

pub(super) fn remove_all_in(txn: &mut Transaction<'_>, id: EntryId) -> Result<usize> {
    let found = txn.scan_all(&keys::xattrs_pattern(id))?;
    let removed = found.len();
    for key in found {
        txn.delete(key);
    }
    Ok(removed)
}
