//! Archive tier object stores
//!
//! An object store moves whole objects between a local path and the
//! archive. It never sees partial I/O.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{KvsnsError, Result};

/// Whole-object archive tier
pub trait ObjectStore: Send + Sync {
    /// Store the content of `src` as `objid`, replacing any previous copy
    fn put(&self, objid: &str, src: &Path) -> Result<()>;

    /// Copy `objid` into `dst`
    fn get(&self, objid: &str, dst: &Path) -> Result<()>;

    /// Drop `objid`
    fn delete(&self, objid: &str) -> Result<()>;
}

// =============================================================================
// Directory archive
// =============================================================================

/// Archive objects are files in a directory
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, objid: &str) -> Result<PathBuf> {
        if objid.is_empty() || objid.contains('/') || objid.starts_with('.') {
            return Err(KvsnsError::InvalidArgument(format!(
                "Invalid archive object id: {:?}",
                objid
            )));
        }
        Ok(self.root.join(objid))
    }
}

impl ObjectStore for DirObjectStore {
    fn put(&self, objid: &str, src: &Path) -> Result<()> {
        let dst = self.object_path(objid)?;
        let tmp = self.root.join(format!(".{}.tmp", objid));
        fs::copy(src, &tmp)?;
        fs::rename(&tmp, &dst)?;
        Ok(())
    }

    fn get(&self, objid: &str, dst: &Path) -> Result<()> {
        let src = self.object_path(objid)?;
        fs::copy(&src, dst).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KvsnsError::NotFound(format!("archive object {}", objid)),
            _ => KvsnsError::Io(e),
        })?;
        Ok(())
    }

    fn delete(&self, objid: &str) -> Result<()> {
        let path = self.object_path(objid)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KvsnsError::NotFound(format!("archive object {}", objid)),
            _ => KvsnsError::Io(e),
        })
    }
}

// =============================================================================
// Command archive
// =============================================================================

/// Archive objects are moved by external commands.
///
/// Each command is an argv vector; `{path}` and `{objid}` are replaced in
/// every argument. A non-zero exit status is a backend failure.
pub struct CommandObjectStore {
    put: Vec<String>,
    get: Vec<String>,
    delete: Vec<String>,
}

impl CommandObjectStore {
    pub fn new(put: Vec<String>, get: Vec<String>, delete: Vec<String>) -> Result<Self> {
        for (name, argv) in [("put", &put), ("get", &get), ("delete", &delete)] {
            if argv.is_empty() {
                return Err(KvsnsError::Config(format!("Archive {} command is empty", name)));
            }
        }
        Ok(Self { put, get, delete })
    }

    fn run(&self, template: &[String], objid: &str, path: Option<&Path>) -> Result<()> {
        let path = path.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        let argv: Vec<String> = template
            .iter()
            .map(|arg| arg.replace("{path}", &path).replace("{objid}", objid))
            .collect();

        tracing::debug!("Running archive command {:?}", argv);
        let output = Command::new(&argv[0]).args(&argv[1..]).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KvsnsError::backend(format!(
                "{} exited with {}: {}",
                argv[0],
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl ObjectStore for CommandObjectStore {
    fn put(&self, objid: &str, src: &Path) -> Result<()> {
        self.run(&self.put, objid, Some(src))
    }

    fn get(&self, objid: &str, dst: &Path) -> Result<()> {
        self.run(&self.get, objid, Some(dst))
    }

    fn delete(&self, objid: &str) -> Result<()> {
        self.run(&self.delete, objid, None)
    }
}
