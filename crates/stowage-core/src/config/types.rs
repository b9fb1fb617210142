use serde::{Deserialize, Serialize};

use super::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StowageConfig {
    pub repository: RepositoryConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub blocks: BlockConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub index_file_policy: IndexFilePolicy,
    #[serde(default)]
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Where the remote volumes live: a bare path or `file://` URL.
    pub url: String,
    /// Name prefix shared by every volume of this backup.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path of the local database file.
    pub path: String,
}

/// Block parameters. Unset values are taken from the database, or from the
/// built-in defaults for a new database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockConfig {
    pub block_size: Option<u32>,
    /// Kept as text so an unknown name surfaces as a user error at resolve time.
    pub hash_algorithm: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: CompressionAlgorithm,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            zstd_level: default_zstd_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Lz4,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

/// How much an index volume carries.
///
/// `None` disables index volumes entirely, `Lookup` lists the blocks of each
/// referenced blocks volume, `Full` also embeds every blocklist stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFilePolicy {
    None,
    Lookup,
    #[default]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepairConfig {
    /// Remote volumes downloaded in parallel during block recovery.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Rebuilt volumes uploading in the background at once.
    #[serde(default = "default_max_in_flight_uploads")]
    pub max_in_flight_uploads: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            max_in_flight_uploads: default_max_in_flight_uploads(),
        }
    }
}

impl StowageConfig {
    /// Minimal config for a repository and database path, everything else default.
    pub fn new(url: impl Into<String>, database_path: impl Into<String>) -> Self {
        Self {
            repository: RepositoryConfig {
                url: url.into(),
                prefix: default_prefix(),
            },
            database: DatabaseConfig {
                path: database_path.into(),
            },
            blocks: BlockConfig::default(),
            compression: CompressionConfig::default(),
            index_file_policy: IndexFilePolicy::default(),
            repair: RepairConfig::default(),
        }
    }
}
