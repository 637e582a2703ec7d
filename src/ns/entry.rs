//! Entry lifecycle and lookup

use crate::error::{KvsnsError, Result};
use crate::keys;
use crate::types::{EntryId, Timespec, ROOT_ID};

use super::{
    check_access, check_owner_or_write, encode_list, put_stat, remove_facets, txn_child, txn_dir,
    txn_parents, txn_stat, Access, AttrMask, Cred, EntryType, Kvsns, Stat, S_IFMT,
};

/// What kind of entry `create_entry` makes
enum NewEntry<'a> {
    Dir,
    File { objid: Option<&'a str> },
    Symlink { target: &'a str },
}

impl NewEntry<'_> {
    fn kind(&self) -> EntryType {
        match self {
            NewEntry::Dir => EntryType::Dir,
            NewEntry::File { .. } => EntryType::File,
            NewEntry::Symlink { .. } => EntryType::Symlink,
        }
    }
}

impl Kvsns {
    // =========================================================================
    // Creation
    // =========================================================================

    pub fn mkdir(&self, cred: &Cred, parent: EntryId, name: &str, mode: u32) -> Result<(EntryId, Stat)> {
        self.create_entry(cred, parent, name, NewEntry::Dir, mode)
    }

    pub fn creat(&self, cred: &Cred, parent: EntryId, name: &str, mode: u32) -> Result<(EntryId, Stat)> {
        self.create_entry(cred, parent, name, NewEntry::File { objid: None }, mode)
    }

    pub fn symlink(&self, cred: &Cred, parent: EntryId, name: &str, target: &str) -> Result<(EntryId, Stat)> {
        if target.is_empty() || target.len() > keys::LINK_MAX || target.contains('\0') {
            return Err(KvsnsError::InvalidArgument(format!(
                "Symlink target must be 1..={} bytes without NUL",
                keys::LINK_MAX
            )));
        }
        self.create_entry(cred, parent, name, NewEntry::Symlink { target }, 0o777)
    }

    /// Create a file bound to an object that already exists in the backend
    pub fn attach(
        &self,
        cred: &Cred,
        parent: EntryId,
        name: &str,
        objid: &str,
        mode: u32,
    ) -> Result<(EntryId, Stat)> {
        self.create_entry(cred, parent, name, NewEntry::File { objid: Some(objid) }, mode)
    }

    pub fn readlink(&self, cred: &Cred, id: EntryId) -> Result<String> {
        let stat = self.load_stat(id)?;
        if !stat.is_symlink() {
            return Err(KvsnsError::InvalidArgument(format!("Entry {} is not a symlink", id)));
        }
        check_access(cred, &stat, Access::READ)?;
        self.kv
            .get_string(&keys::link(id))?
            .ok_or_else(|| KvsnsError::Corrupted(format!("Symlink {} has no target", id)))
    }

    fn create_entry(
        &self,
        cred: &Cred,
        parent: EntryId,
        name: &str,
        new: NewEntry<'_>,
        mode: u32,
    ) -> Result<(EntryId, Stat)> {
        keys::validate_name(name)?;

        let mut txn = self.kv.begin();
        let mut pstat = txn_dir(&txn, parent)?;
        check_access(cred, &pstat, Access::WRITE)?;
        if txn.exists(&keys::dentry(parent, name))? {
            return Err(KvsnsError::AlreadyExists(format!("{:?} in directory {}", name, parent)));
        }

        let id = self.alloc_id()?;
        let mut stat = Stat::new(id, new.kind(), mode, cred.uid, cred.gid);

        txn.set_string(keys::dentry(parent, name), &id.to_string());
        txn.set(keys::parentdir(id), encode_list(&[parent])?);
        match new {
            NewEntry::Dir => {}
            NewEntry::Symlink { target } => {
                stat.size = target.len() as u64;
                txn.set_string(keys::link(id), target);
            }
            NewEntry::File { objid: None } => self.backend.create(&mut txn, id)?,
            NewEntry::File { objid: Some(objid) } => {
                let attr = self.backend.attach(&mut txn, id, objid)?;
                stat.merge_data(&attr);
            }
        }
        put_stat(&mut txn, &stat);

        pstat.touch(stat.ctime);
        put_stat(&mut txn, &pstat);
        txn.commit()?;

        tracing::debug!("Created {:?} {} as {:?} in {}", stat.entry_type(), id, name, parent);
        Ok((id, stat))
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Child `name` of directory `parent`
    pub fn lookup(&self, cred: &Cred, parent: EntryId, name: &str) -> Result<EntryId> {
        let pstat = self.load_dir(parent)?;
        check_access(cred, &pstat, Access::READ)?;
        match self.kv.get(&keys::dentry(parent, name))? {
            Some(bytes) => keys::parse_id(&bytes),
            None => Err(KvsnsError::NotFound(format!("{:?} in directory {}", name, parent))),
        }
    }

    /// First parent of an entry; the root is its own parent
    pub fn lookupp(&self, cred: &Cred, id: EntryId) -> Result<EntryId> {
        let stat = self.load_stat(id)?;
        check_access(cred, &stat, Access::READ)?;
        let parents: Vec<EntryId> = match self.kv.get(&keys::parentdir(id))? {
            Some(bytes) => super::decode_list(&bytes)?,
            None => Vec::new(),
        };
        parents
            .first()
            .copied()
            .ok_or_else(|| KvsnsError::NotFound(format!("parent of entry {}", id)))
    }

    /// Resolve a `/`-separated path. Absolute paths start at the root,
    /// relative ones at `start`. Symlinks are not followed.
    pub fn lookup_path(&self, cred: &Cred, start: EntryId, path: &str) -> Result<EntryId> {
        let mut current = if path.starts_with('/') { ROOT_ID } else { start };
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => current = self.lookupp(cred, current)?,
                name => current = self.lookup(cred, current, name)?,
            }
        }
        Ok(current)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn access(&self, cred: &Cred, id: EntryId, access: Access) -> Result<()> {
        let stat = self.load_stat(id)?;
        check_access(cred, &stat, access)
    }

    /// Attributes of an entry; files take size and times from the backend
    pub fn getattr(&self, _cred: &Cred, id: EntryId) -> Result<Stat> {
        let mut stat = self.load_stat(id)?;
        if stat.is_file() {
            let attr = self.backend.getattr(id)?;
            stat.merge_data(&attr);
        }
        Ok(stat)
    }

    /// Apply the fields of `values` selected by `mask`
    pub fn setattr(&self, cred: &Cred, id: EntryId, values: &Stat, mask: AttrMask) -> Result<Stat> {
        if mask.is_empty() {
            return Err(KvsnsError::InvalidArgument("Empty attribute mask".to_string()));
        }
        if mask.bits() & !AttrMask::all().bits() != 0 {
            return Err(KvsnsError::InvalidArgument(format!(
                "Unknown attribute mask bits {:#x}",
                mask.bits() & !AttrMask::all().bits()
            )));
        }

        let mut txn = self.kv.begin();
        let mut stat = txn_stat(&txn, id)?;
        check_owner_or_write(cred, &stat)?;
        if mask.contains(AttrMask::SIZE) && !stat.is_file() {
            return Err(KvsnsError::InvalidArgument(format!(
                "Cannot set the size of non-file entry {}",
                id
            )));
        }

        // only root hands an entry to another owner or group
        let chown = (mask.contains(AttrMask::UID) && values.uid != stat.uid)
            || (mask.contains(AttrMask::GID) && values.gid != stat.gid);
        if chown && !cred.is_root() {
            return Err(KvsnsError::PermissionDenied);
        }

        if mask.contains(AttrMask::MODE) {
            stat.mode = (stat.mode & S_IFMT) | (values.mode & super::PERM_MASK);
        }
        if mask.contains(AttrMask::UID) {
            stat.uid = values.uid;
        }
        if mask.contains(AttrMask::GID) {
            stat.gid = values.gid;
        }
        if mask.contains(AttrMask::SIZE) {
            let attr = self.backend.truncate(id, values.size)?;
            stat.merge_data(&attr);
        }
        if mask.contains(AttrMask::ATIME) {
            stat.atime = values.atime;
        }
        if mask.contains(AttrMask::MTIME) {
            stat.mtime = values.mtime;
        }
        stat.ctime = if mask.contains(AttrMask::CTIME) {
            values.ctime
        } else {
            Timespec::now()
        };

        put_stat(&mut txn, &stat);
        txn.commit()?;
        Ok(stat)
    }

    // =========================================================================
    // Links
    // =========================================================================

    /// Add a hard link to a non-directory entry
    pub fn link(&self, cred: &Cred, id: EntryId, dest_dir: EntryId, dest_name: &str) -> Result<Stat> {
        keys::validate_name(dest_name)?;

        let mut txn = self.kv.begin();
        let mut stat = txn_stat(&txn, id)?;
        if stat.is_dir() {
            return Err(KvsnsError::InvalidArgument(format!("Cannot hard link directory {}", id)));
        }
        let mut dstat = txn_dir(&txn, dest_dir)?;
        check_access(cred, &dstat, Access::WRITE)?;
        if txn.exists(&keys::dentry(dest_dir, dest_name))? {
            return Err(KvsnsError::AlreadyExists(format!(
                "{:?} in directory {}",
                dest_name, dest_dir
            )));
        }

        let mut parents = txn_parents(&txn, id)?;
        if parents.is_empty() {
            // unlinked while still open
            return Err(KvsnsError::NotFound(format!("entry {}", id)));
        }
        parents.push(dest_dir);

        let now = Timespec::now();
        stat.nlink = parents.len() as u32;
        stat.ctime = now;
        dstat.touch(now);

        txn.set_string(keys::dentry(dest_dir, dest_name), &id.to_string());
        txn.set(keys::parentdir(id), encode_list(&parents)?);
        put_stat(&mut txn, &stat);
        put_stat(&mut txn, &dstat);
        txn.commit()?;

        tracing::debug!("Linked {} as {:?} in {}", id, dest_name, dest_dir);
        Ok(stat)
    }

    /// Remove a non-directory name. The last name of an entry destroys it,
    /// or defers destruction to the last close while it is open.
    pub fn unlink(&self, cred: &Cred, dir: EntryId, name: &str) -> Result<()> {
        let mut txn = self.kv.begin();
        let mut dstat = txn_dir(&txn, dir)?;
        check_access(cred, &dstat, Access::WRITE)?;
        let id = txn_child(&txn, dir, name)?;
        let mut stat = txn_stat(&txn, id)?;
        if stat.is_dir() {
            return Err(KvsnsError::InvalidArgument(format!(
                "{:?} is a directory, use rmdir",
                name
            )));
        }

        let now = Timespec::now();
        txn.delete(keys::dentry(dir, name));
        dstat.touch(now);
        put_stat(&mut txn, &dstat);

        let mut parents = txn_parents(&txn, id)?;
        if let Some(pos) = parents.iter().position(|&p| p == dir) {
            parents.remove(pos);
        }

        let mut destroy_data = false;
        if !parents.is_empty() {
            stat.nlink = parents.len() as u32;
            stat.ctime = now;
            txn.set(keys::parentdir(id), encode_list(&parents)?);
            put_stat(&mut txn, &stat);
        } else if txn.exists(&keys::openowner(id))? {
            stat.nlink = 0;
            stat.ctime = now;
            txn.delete(keys::parentdir(id));
            txn.set_string(keys::opened_and_deleted(id), "1");
            put_stat(&mut txn, &stat);
            tracing::debug!("Entry {} unlinked while open, deletion deferred", id);
        } else {
            remove_facets(&mut txn, id)?;
            destroy_data = stat.is_file();
        }
        txn.commit()?;

        if destroy_data {
            self.backend.delete(id)?;
        }
        tracing::debug!("Unlinked {:?} from {}", name, dir);
        Ok(())
    }

    pub fn rename(
        &self,
        cred: &Cred,
        src_dir: EntryId,
        src_name: &str,
        dst_dir: EntryId,
        dst_name: &str,
    ) -> Result<()> {
        keys::validate_name(dst_name)?;

        let mut txn = self.kv.begin();
        let mut sstat = txn_dir(&txn, src_dir)?;
        check_access(cred, &sstat, Access::WRITE)?;
        let id = txn_child(&txn, src_dir, src_name)?;
        if src_dir == dst_dir && src_name == dst_name {
            return Ok(());
        }

        let mut dstat = if dst_dir == src_dir {
            sstat
        } else {
            let dstat = txn_dir(&txn, dst_dir)?;
            check_access(cred, &dstat, Access::WRITE)?;
            dstat
        };
        if txn.exists(&keys::dentry(dst_dir, dst_name))? {
            return Err(KvsnsError::AlreadyExists(format!(
                "{:?} in directory {}",
                dst_name, dst_dir
            )));
        }

        let mut stat = txn_stat(&txn, id)?;
        if stat.is_dir() && dst_dir != src_dir && self.is_ancestor(&txn, id, dst_dir)? {
            return Err(KvsnsError::InvalidArgument(format!(
                "Cannot move directory {} under itself",
                id
            )));
        }

        let now = Timespec::now();
        txn.delete(keys::dentry(src_dir, src_name));
        txn.set_string(keys::dentry(dst_dir, dst_name), &id.to_string());

        if src_dir != dst_dir {
            let mut parents = txn_parents(&txn, id)?;
            if let Some(slot) = parents.iter_mut().find(|p| **p == src_dir) {
                *slot = dst_dir;
            }
            txn.set(keys::parentdir(id), encode_list(&parents)?);
            dstat.touch(now);
            put_stat(&mut txn, &dstat);
        }
        stat.ctime = now;
        put_stat(&mut txn, &stat);
        sstat.touch(now);
        put_stat(&mut txn, &sstat);
        txn.commit()?;

        tracing::debug!(
            "Renamed {:?} in {} to {:?} in {}",
            src_name,
            src_dir,
            dst_name,
            dst_dir
        );
        Ok(())
    }

    /// Remove an empty directory
    pub fn rmdir(&self, cred: &Cred, dir: EntryId, name: &str) -> Result<()> {
        let mut txn = self.kv.begin();
        let mut dstat = txn_dir(&txn, dir)?;
        check_access(cred, &dstat, Access::WRITE)?;
        let id = txn_child(&txn, dir, name)?;
        let stat = txn_stat(&txn, id)?;
        if !stat.is_dir() {
            return Err(KvsnsError::InvalidArgument(format!("{:?} is not a directory", name)));
        }
        if txn.any_match(&keys::dentries_pattern(id))? {
            return Err(KvsnsError::DirectoryNotEmpty(id));
        }

        txn.delete(keys::dentry(dir, name));
        remove_facets(&mut txn, id)?;
        dstat.touch(Timespec::now());
        put_stat(&mut txn, &dstat);
        txn.commit()?;

        tracing::debug!("Removed directory {} ({:?} in {})", id, name, dir);
        Ok(())
    }

    /// Whether `ancestor` is `id` or one of its first-parent ancestors
    fn is_ancestor(
        &self,
        txn: &crate::kvs::Transaction<'_>,
        ancestor: EntryId,
        mut id: EntryId,
    ) -> Result<bool> {
        loop {
            if id == ancestor {
                return Ok(true);
            }
            if id == ROOT_ID {
                return Ok(false);
            }
            match txn_parents(txn, id)?.first() {
                Some(&parent) => id = parent,
                None => return Ok(false),
            }
        }
    }
}
