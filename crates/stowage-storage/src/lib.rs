pub mod local_backend;

use std::path::Path;

use stowage_types::error::{Result, StowageError};

pub use local_backend::LocalBackend;

/// One entry of a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
}

/// Flat key/value object storage holding the remote volumes.
///
/// Implementations must be safe to share between the control thread, the
/// download workers and the background upload threads.
pub trait ObjectStore: Send + Sync {
    /// Read a whole object. `Ok(None)` when it does not exist.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object, replacing any existing one atomically.
    fn put(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Write an owned buffer. Backends that can avoid a copy override this.
    fn put_owned(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.put(name, &data)
    }

    /// Delete an object. Deleting a missing object is not an error.
    fn delete(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;

    /// List every object with its size.
    fn list(&self) -> Result<Vec<ObjectInfo>>;
}

/// Where the remote volumes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub url: String,
}

/// Build a storage backend from a URL.
///
/// Accepts a plain filesystem path or a `file://` URL. Network schemes are
/// reported as unsupported.
pub fn backend_from_config(cfg: &StorageConfig) -> Result<Box<dyn ObjectStore>> {
    let url = cfg.url.trim();
    if url.is_empty() {
        return Err(StowageError::Config("repository url is empty".into()));
    }
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(LocalBackend::new(path)?));
    }
    if let Some((scheme, _)) = url.split_once("://") {
        return Err(StowageError::UnsupportedBackend(scheme.to_string()));
    }
    // `host:path` shorthand is an ssh location, not a local path.
    if Path::new(url).is_absolute() || !url.contains(':') {
        return Ok(Box::new(LocalBackend::new(url)?));
    }
    Err(StowageError::UnsupportedBackend(url.to_string()))
}
