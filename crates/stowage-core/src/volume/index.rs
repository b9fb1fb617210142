use serde::{Deserialize, Serialize};
use stowage_types::Digest;

use crate::error::{Result, StowageError};

pub const INDEX_MAGIC: &[u8; 8] = b"STOWINDX";
pub const INDEX_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedBlock {
    pub hash: Digest,
    pub size: u32,
}

/// What an index volume claims about one blocks volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedVolume {
    pub name: String,
    pub hash: Digest,
    pub size: u64,
    pub blocks: Vec<IndexedBlock>,
}

/// A blocklist block embedded in an index volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBlocklist {
    pub hash: Digest,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexVolumeContents {
    pub volumes: Vec<IndexedVolume>,
    pub blocklists: Vec<IndexBlocklist>,
}

/// Builds an index volume one referenced blocks volume at a time.
#[derive(Default)]
pub struct IndexVolumeWriter {
    contents: IndexVolumeContents,
    current: Option<(String, Vec<IndexedBlock>)>,
}

impl IndexVolumeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_volume(&mut self, name: &str) {
        self.current = Some((name.to_string(), Vec::new()));
    }

    pub fn add_block(&mut self, hash: Digest, size: u32) -> Result<()> {
        let (_, blocks) = self
            .current
            .as_mut()
            .ok_or_else(|| StowageError::Other("add_block outside of a volume".into()))?;
        blocks.push(IndexedBlock { hash, size });
        Ok(())
    }

    /// Close the current volume with its recorded hash and size.
    pub fn finish_volume(&mut self, hash: Digest, size: u64) -> Result<()> {
        let (name, blocks) = self
            .current
            .take()
            .ok_or_else(|| StowageError::Other("finish_volume without start_volume".into()))?;
        self.contents.volumes.push(IndexedVolume {
            name,
            hash,
            size,
            blocks,
        });
        Ok(())
    }

    pub fn write_blocklist(&mut self, hash: Digest, data: Vec<u8>) {
        self.contents.blocklists.push(IndexBlocklist { hash, data });
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if let Some((name, _)) = self.current {
            return Err(StowageError::Other(format!(
                "index volume closed while '{name}' is still open"
            )));
        }
        let body = rmp_serde::to_vec_named(&self.contents)?;
        let mut out = Vec::with_capacity(INDEX_MAGIC.len() + 1 + body.len());
        out.extend_from_slice(INDEX_MAGIC);
        out.push(INDEX_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// Parse a downloaded index volume.
pub fn read_index_volume(data: &[u8]) -> Result<IndexVolumeContents> {
    if data.len() < INDEX_MAGIC.len() + 1 || &data[..8] != INDEX_MAGIC {
        return Err(StowageError::InvalidFormat("invalid index volume magic".into()));
    }
    if data[8] != INDEX_VERSION {
        return Err(StowageError::InvalidFormat(format!(
            "unsupported index volume version {}",
            data[8]
        )));
    }
    Ok(rmp_serde::from_slice(&data[9..])?)
}
