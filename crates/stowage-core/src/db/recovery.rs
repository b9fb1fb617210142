use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use stowage_types::Digest;

use super::{LocalDatabase, VolumeId};

/// A place in a local file where a block may still be found.
///
/// Only a candidate: the file may have changed since the backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    pub path: PathBuf,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct RecoveryBlock {
    pub hash: Digest,
    pub size: u32,
    pub sources: Vec<LocalSource>,
}

/// Blocks a missing volume must contain, and which of them have been
/// recovered so far.
#[derive(Debug)]
pub struct BlockRecoveryList {
    volume_id: VolumeId,
    blocks: Vec<RecoveryBlock>,
    by_hash: HashMap<Digest, usize>,
    restored: HashSet<Digest>,
}

impl BlockRecoveryList {
    pub fn volume_id(&self) -> VolumeId {
        self.volume_id
    }

    pub fn blocks(&self) -> &[RecoveryBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn expected_size(&self, hash: &Digest) -> Option<u32> {
        self.by_hash.get(hash).map(|&i| self.blocks[i].size)
    }

    /// Mark `hash` recovered. Returns `true` only the first time, and only for
    /// a block this volume needs with the expected size.
    pub fn set_block_restored(&mut self, hash: &Digest, size: u32) -> bool {
        match self.expected_size(hash) {
            Some(expected) if expected == size => self.restored.insert(hash.clone()),
            _ => false,
        }
    }

    pub fn is_missing(&self, hash: &Digest) -> bool {
        self.by_hash.contains_key(hash) && !self.restored.contains(hash)
    }

    /// Outstanding blocks in volume order.
    pub fn missing(&self) -> impl Iterator<Item = &RecoveryBlock> {
        self.blocks
            .iter()
            .filter(|b| !self.restored.contains(&b.hash))
    }

    pub fn missing_hashes(&self) -> HashSet<Digest> {
        self.missing().map(|b| b.hash.clone()).collect()
    }

    pub fn missing_count(&self) -> usize {
        self.blocks.len() - self.restored.len()
    }
}

impl LocalDatabase {
    /// Every block whose home is `volume_id`, with the local file ranges that
    /// should contain it. The offset of block `i` of a file is
    /// `i * block_size`.
    pub fn block_recovery_list(&self, volume_id: VolumeId, block_size: u32) -> BlockRecoveryList {
        let mut blocks = Vec::new();
        let mut by_hash = HashMap::new();
        for (hash, size) in self.blocks_in_volume(volume_id) {
            by_hash.insert(hash.clone(), blocks.len());
            blocks.push(RecoveryBlock {
                hash,
                size,
                sources: Vec::new(),
            });
        }

        for file in self.state.files.values() {
            let Some(blockset) = self.blockset(file.blockset_id) else {
                continue;
            };
            for (i, hash) in blockset.blocks.iter().enumerate() {
                let Some(&slot) = by_hash.get(hash) else {
                    continue;
                };
                let source = LocalSource {
                    path: PathBuf::from(&file.path),
                    offset: i as u64 * block_size as u64,
                };
                let sources = &mut blocks[slot].sources;
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }

        BlockRecoveryList {
            volume_id,
            blocks,
            by_hash,
            restored: HashSet::new(),
        }
    }
}
