use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const FILESET_VERSION: u32 = 1;

/// One file of a point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetEntry {
    pub path: String,
    pub size: u64,
    /// Hex digest of the full file content.
    pub hash: String,
    /// Hex digest of the metadata blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metahash: Option<String>,
    /// Hex hashes of the file's blocklist blocks; empty for single-block files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocklists: Vec<String>,
}

/// Contents of a `Files` volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetManifest {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<FilesetEntry>,
}

impl FilesetManifest {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            version: FILESET_VERSION,
            timestamp,
            entries: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
