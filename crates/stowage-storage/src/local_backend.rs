use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use stowage_types::error::{Result, StowageError};
use tracing::debug;

use crate::{ObjectInfo, ObjectStore};

/// Remote volumes stored as flat files in one directory.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`. The directory is created if needed.
    pub fn new(root: &str) -> Result<Self> {
        let root_path = PathBuf::from(root);
        if !root_path.exists() {
            fs::create_dir_all(&root_path)?;
        }
        let root = fs::canonicalize(&root_path)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Volume names are flat; anything that could leave the root is refused.
    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StowageError::InvalidFormat("unsafe volume name: empty".into()));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(StowageError::InvalidFormat(format!(
                "unsafe volume name: contains a path separator '{name}'"
            )));
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(StowageError::InvalidFormat(format!(
                "unsafe volume name: '{name}'"
            ))),
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        Self::validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Write to a temp file next to the target and rename it into place, so a
    /// listing never shows a partial volume.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ObjectStore for LocalBackend {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        self.atomic_write(&path, data)?;
        debug!(name, bytes = data.len(), "stored volume");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-progress atomic writes.
            if name.starts_with(".tmp-") {
                continue;
            }
            out.push(ObjectInfo {
                name,
                size: entry.metadata()?.len(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}
