use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use stowage_types::Digest;

use crate::compress::{self, Compression};
use crate::error::{Result, StowageError};

/// Magic bytes at the start of every blocks volume.
pub const BLOCKS_MAGIC: &[u8; 8] = b"STOWBLKS";
pub const BLOCKS_VERSION: u8 = 1;
/// Magic + version byte.
pub const BLOCKS_HEADER_SIZE: usize = 9;

/// One entry in the volume's trailing header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub hash: Digest,
    /// Start of the stored (compressed) blob, after its length prefix.
    pub offset: u64,
    /// Stored blob length.
    pub length: u32,
    /// Uncompressed block size.
    pub size: u32,
}

/// Accumulates blocks into one in-memory blocks volume.
///
/// Layout: `[magic][version]` then `[u32 LE len][tagged blob]` per block, then
/// the rmp-encoded header entries and the header length as `u32 LE`.
pub struct BlockVolumeWriter {
    compression: Compression,
    bytes: Vec<u8>,
    entries: Vec<BlockEntry>,
    seen: HashSet<Digest>,
}

impl BlockVolumeWriter {
    pub fn new(compression: Compression) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(BLOCKS_MAGIC);
        bytes.push(BLOCKS_VERSION);
        Self {
            compression,
            bytes,
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append a block. A hash already in the volume is skipped and `false`
    /// is returned.
    pub fn add_block(&mut self, hash: &Digest, data: &[u8]) -> Result<bool> {
        if self.seen.contains(hash) {
            return Ok(false);
        }
        let blob = compress::compress(self.compression, data)?;
        let length = u32::try_from(blob.len())
            .map_err(|_| StowageError::Other(format!("block {hash} too large")))?;

        self.bytes.extend_from_slice(&length.to_le_bytes());
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(&blob);

        self.entries.push(BlockEntry {
            hash: hash.clone(),
            offset,
            length,
            size: data.len() as u32,
        });
        self.seen.insert(hash.clone());
        Ok(true)
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.seen.contains(hash)
    }

    pub fn block_count(&self) -> usize {
        self.entries.len()
    }

    /// Append the header trailer and return the finished volume bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let header = rmp_serde::to_vec(&self.entries)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| StowageError::Other("blocks volume header too large".into()))?;
        self.bytes.extend_from_slice(&header);
        self.bytes.extend_from_slice(&header_len.to_le_bytes());
        Ok(self.bytes)
    }
}

/// Read view over a downloaded blocks volume.
pub struct BlockVolumeReader<'a> {
    data: &'a [u8],
    entries: Vec<BlockEntry>,
}

impl<'a> BlockVolumeReader<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self> {
        if data.len() < BLOCKS_HEADER_SIZE + 4 {
            return Err(StowageError::InvalidFormat("blocks volume too small".into()));
        }
        if &data[..8] != BLOCKS_MAGIC {
            return Err(StowageError::InvalidFormat("invalid blocks volume magic".into()));
        }
        if data[8] != BLOCKS_VERSION {
            return Err(StowageError::InvalidFormat(format!(
                "unsupported blocks volume version {}",
                data[8]
            )));
        }

        let len_offset = data.len() - 4;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[len_offset..]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if header_len > len_offset - BLOCKS_HEADER_SIZE {
            return Err(StowageError::InvalidFormat(
                "invalid blocks volume header length".into(),
            ));
        }
        let header_start = len_offset - header_len;
        let entries: Vec<BlockEntry> = rmp_serde::from_slice(&data[header_start..len_offset])?;

        for entry in &entries {
            let end = entry.offset.saturating_add(entry.length as u64);
            if entry.offset < BLOCKS_HEADER_SIZE as u64 + 4 || end > header_start as u64 {
                return Err(StowageError::InvalidFormat(format!(
                    "block {} lies outside the data area",
                    entry.hash
                )));
            }
        }

        Ok(Self { data, entries })
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// Decompress one block and check its recorded size.
    pub fn read_block(&self, entry: &BlockEntry) -> Result<Vec<u8>> {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        let blob = self.data.get(start..end).ok_or_else(|| {
            StowageError::InvalidFormat(format!("block {} out of range", entry.hash))
        })?;
        let block = compress::decompress(blob)?;
        if block.len() != entry.size as usize {
            return Err(StowageError::InvalidFormat(format!(
                "block {} decompressed to {} bytes, header says {}",
                entry.hash,
                block.len(),
                entry.size
            )));
        }
        Ok(block)
    }

    /// Every block in header order as `(entry, content)`.
    pub fn blocks(&self) -> impl Iterator<Item = (&BlockEntry, Result<Vec<u8>>)> + '_ {
        self.entries.iter().map(move |e| (e, self.read_block(e)))
    }
}
