use std::sync::Arc;

use stowage_storage::{ObjectStore, StorageConfig};

use crate::config::RepositoryConfig;
use crate::error::Result;

/// Convert a [`RepositoryConfig`] into a [`StorageConfig`] for backend construction.
pub fn storage_config_from_repo(cfg: &RepositoryConfig) -> StorageConfig {
    StorageConfig {
        url: cfg.url.clone(),
    }
}

/// Build a shared storage backend from the repository configuration.
pub fn backend_from_config(cfg: &RepositoryConfig) -> Result<Arc<dyn ObjectStore>> {
    let backend = stowage_storage::backend_from_config(&storage_config_from_repo(cfg))?;
    Ok(Arc::from(backend))
}
