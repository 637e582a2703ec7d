//! Directory listing

use crate::error::{KvsnsError, Result};
use crate::keys;
use crate::types::EntryId;

use super::{check_access, Access, Cred, Kvsns, Stat};

/// Child names of a directory, captured at `opendir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub dir: EntryId,
    pub names: Vec<String>,
}

impl DirListing {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One `readdir` result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub id: EntryId,
    pub stat: Stat,
}

impl Kvsns {
    /// Snapshot the names of a directory's children, in name order
    pub fn opendir(&self, cred: &Cred, dir: EntryId) -> Result<DirListing> {
        let stat = self.load_dir(dir)?;
        check_access(cred, &stat, Access::READ)?;

        let prefix = keys::dentry_prefix(dir);
        let names = self
            .kv
            .scan_all(&keys::dentries_pattern(dir))?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        Ok(DirListing { dir, names })
    }

    /// Up to `count` entries of a listing starting at position `offset`.
    ///
    /// Names removed since `opendir` are skipped.
    pub fn readdir(
        &self,
        cred: &Cred,
        listing: &DirListing,
        offset: usize,
        count: usize,
    ) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for name in listing.names.iter().skip(offset).take(count) {
            let id = match self.kv.get(&keys::dentry(listing.dir, name))? {
                Some(bytes) => keys::parse_id(&bytes)?,
                None => continue,
            };
            match self.getattr(cred, id) {
                Ok(stat) => entries.push(DirEntry {
                    name: name.clone(),
                    id,
                    stat,
                }),
                Err(KvsnsError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }
}
