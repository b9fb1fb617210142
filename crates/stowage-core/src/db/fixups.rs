//! Idempotent repairs of local metadata. Each returns how many records it
//! changed, so a second run reports zero.

use std::collections::{HashMap, HashSet};

use stowage_types::{ContentHasher, Digest};
use tracing::info;

use super::LocalDatabase;
use crate::blocklist;

impl LocalDatabase {
    /// Merge metadata sets whose blocksets have the same content, repointing
    /// file entries at the survivor.
    pub fn fix_duplicate_metahash(&mut self) -> usize {
        let mut keep: HashMap<(Digest, u64), u64> = HashMap::new();
        let mut remap: HashMap<u64, u64> = HashMap::new();

        for meta in self.state.metadatasets.values() {
            let Some(bs) = self.state.blocksets.get(&meta.blockset_id) else {
                continue;
            };
            let key = (bs.full_hash.clone(), bs.length);
            match keep.get(&key) {
                Some(&survivor) => {
                    remap.insert(meta.id, survivor);
                }
                None => {
                    keep.insert(key, meta.id);
                }
            }
        }
        if remap.is_empty() {
            return 0;
        }

        for file in self.state.files.values_mut() {
            if let Some(target) = file.metadata_id.and_then(|m| remap.get(&m)) {
                file.metadata_id = Some(*target);
            }
        }
        self.state.metadatasets.retain(|id, _| !remap.contains_key(id));
        info!(removed = remap.len(), "merged duplicate metadata hashes");
        remap.len()
    }

    /// Merge file entries with identical path, blockset and metadata,
    /// repointing filesets at the survivor.
    pub fn fix_duplicate_file_entries(&mut self) -> usize {
        let mut keep: HashMap<(String, u64, Option<u64>), u64> = HashMap::new();
        let mut remap: HashMap<u64, u64> = HashMap::new();

        for file in self.state.files.values() {
            let key = (file.path.clone(), file.blockset_id, file.metadata_id);
            match keep.get(&key) {
                Some(&survivor) => {
                    remap.insert(file.id, survivor);
                }
                None => {
                    keep.insert(key, file.id);
                }
            }
        }
        if remap.is_empty() {
            return 0;
        }

        for fileset in self.state.filesets.values_mut() {
            let mut seen = HashSet::new();
            let ids = std::mem::take(&mut fileset.file_ids);
            fileset.file_ids = ids
                .into_iter()
                .map(|id| remap.get(&id).copied().unwrap_or(id))
                .filter(|id| seen.insert(*id))
                .collect();
        }
        self.state.files.retain(|id, _| !remap.contains_key(id));
        info!(removed = remap.len(), "merged duplicate file entries");
        remap.len()
    }

    /// Drop repeated blocklist-hash records and records whose index lies past
    /// the blockset's last blocklist block. When one slot carries different
    /// hashes, only the one matching the recomputed blocklist survives; if
    /// none does, the slot is emptied for `fix_missing_blocklist_hashes`.
    pub fn fix_duplicate_blocklist_hashes(&mut self, hasher: &ContentHasher, block_size: u32) -> usize {
        let per = blocklist::hashes_per_blocklist(block_size, hasher.digest_size());
        let blocksets = &self.state.blocksets;

        let mut slots: HashMap<(u64, u32), HashSet<&Digest>> = HashMap::new();
        for r in &self.state.blocklist_hashes {
            slots.entry((r.blockset_id, r.index)).or_default().insert(&r.hash);
        }
        let expected: HashMap<(u64, u32), Option<Digest>> = slots
            .into_iter()
            .filter(|(_, hashes)| hashes.len() > 1)
            .map(|((blockset_id, index), _)| {
                let computed = blocksets
                    .get(&blockset_id)
                    .and_then(|bs| blocklist::blocklist_chunk(&bs.blocks, index as usize, per))
                    .map(|data| hasher.hash(&data));
                ((blockset_id, index), computed)
            })
            .collect();

        let mut seen = HashSet::new();
        let before = self.state.blocklist_hashes.len();
        self.state.blocklist_hashes.retain(|r| {
            let in_range = blocksets.get(&r.blockset_id).is_some_and(|bs| {
                (r.index as usize) < blocklist::blocklist_count(bs.blocks.len(), per)
            });
            let agrees = match expected.get(&(r.blockset_id, r.index)) {
                Some(computed) => computed.as_ref() == Some(&r.hash),
                None => true,
            };
            in_range && agrees && seen.insert((r.blockset_id, r.index, r.hash.clone()))
        });

        let removed = before - self.state.blocklist_hashes.len();
        if removed > 0 {
            info!(removed, "removed duplicate blocklist hashes");
        }
        removed
    }

    /// Recompute blocklist-hash records that are missing for multi-block
    /// blocksets.
    pub fn fix_missing_blocklist_hashes(&mut self, hasher: &ContentHasher, block_size: u32) -> usize {
        let per = blocklist::hashes_per_blocklist(block_size, hasher.digest_size());
        let present: HashSet<(u64, u32)> = self
            .state
            .blocklist_hashes
            .iter()
            .map(|r| (r.blockset_id, r.index))
            .collect();

        let mut added = Vec::new();
        for bs in self.state.blocksets.values() {
            let count = blocklist::blocklist_count(bs.blocks.len(), per);
            for index in 0..count {
                if present.contains(&(bs.id, index as u32)) {
                    continue;
                }
                if let Some(data) = blocklist::blocklist_chunk(&bs.blocks, index, per) {
                    added.push((bs.id, index as u32, hasher.hash(&data)));
                }
            }
        }

        let count = added.len();
        for (blockset_id, index, hash) in added {
            self.add_blocklist_hash(blockset_id, index, hash);
        }
        if count > 0 {
            info!(added = count, "restored missing blocklist hashes");
        }
        count
    }
}
