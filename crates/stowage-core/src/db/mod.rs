//! Local metadata database: remote volumes, blocks, blocksets, file entries
//! and filesets, persisted as one rmp-encoded file.

pub mod fixups;
pub mod recovery;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_types::{Digest, HashAlgorithm};
use tracing::debug;

use crate::blocklist;
use crate::error::{Result, StowageError};
use crate::volume::fileset::{FilesetEntry, FilesetManifest};
use crate::volume::index::IndexedBlock;
use crate::volume::VolumeKind;

pub use recovery::{BlockRecoveryList, LocalSource, RecoveryBlock};

const DATABASE_VERSION: u32 = 1;

pub type VolumeId = u64;

/// Lifecycle of a remote volume record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeState {
    Temporary,
    Uploading,
    Uploaded,
    Verified,
    Deleting,
    Deleted,
}

impl VolumeState {
    /// Content can be relied on as data.
    pub fn is_trusted(self) -> bool {
        matches!(self, VolumeState::Uploaded | VolumeState::Verified)
    }

    /// Expected to exist remotely, including our own in-flight uploads.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            VolumeState::Uploading | VolumeState::Uploaded | VolumeState::Verified
        )
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVolumeRecord {
    pub id: VolumeId,
    pub name: String,
    pub kind: VolumeKind,
    pub state: VolumeState,
    pub size: Option<u64>,
    pub hash: Option<Digest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Digest,
    pub size: u32,
    pub volume_id: VolumeId,
}

/// A further copy of a block stored in another volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateBlockRecord {
    pub hash: Digest,
    pub volume_id: VolumeId,
}

/// The ordered blocks that make up one file or metadata blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksetRecord {
    pub id: u64,
    pub length: u64,
    pub full_hash: Digest,
    pub blocks: Vec<Digest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistHashRecord {
    pub blockset_id: u64,
    pub index: u32,
    pub hash: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadatasetRecord {
    pub id: u64,
    pub blockset_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntryRecord {
    pub id: u64,
    pub path: String,
    pub blockset_id: u64,
    pub metadata_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetRecord {
    pub id: u64,
    pub volume_id: VolumeId,
    pub timestamp: DateTime<Utc>,
    pub file_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBlockLink {
    pub index_volume_id: VolumeId,
    pub block_volume_id: VolumeId,
}

/// Options fixed when the backup was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOptions {
    pub block_size: Option<u32>,
    pub hash_algorithm: Option<HashAlgorithm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseState {
    version: u32,
    options: StoredOptions,
    partially_recreated: bool,
    repair_in_progress: bool,
    next_id: u64,
    volumes: BTreeMap<VolumeId, RemoteVolumeRecord>,
    blocks: Vec<BlockRecord>,
    duplicate_blocks: Vec<DuplicateBlockRecord>,
    blocksets: BTreeMap<u64, BlocksetRecord>,
    blocklist_hashes: Vec<BlocklistHashRecord>,
    metadatasets: BTreeMap<u64, MetadatasetRecord>,
    files: BTreeMap<u64, FileEntryRecord>,
    filesets: BTreeMap<u64, FilesetRecord>,
    index_links: Vec<IndexBlockLink>,
}

impl Default for DatabaseState {
    fn default() -> Self {
        Self {
            version: DATABASE_VERSION,
            options: StoredOptions::default(),
            partially_recreated: false,
            repair_in_progress: false,
            next_id: 1,
            volumes: BTreeMap::new(),
            blocks: Vec::new(),
            duplicate_blocks: Vec::new(),
            blocksets: BTreeMap::new(),
            blocklist_hashes: Vec::new(),
            metadatasets: BTreeMap::new(),
            files: BTreeMap::new(),
            filesets: BTreeMap::new(),
            index_links: Vec::new(),
        }
    }
}

pub struct LocalDatabase {
    path: PathBuf,
    state: DatabaseState,
    block_index: HashMap<Digest, usize>,
}

impl LocalDatabase {
    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// Create and persist an empty database. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(StowageError::User(format!(
                "database file already exists: {}",
                path.display()
            )));
        }
        let db = Self {
            path: path.to_path_buf(),
            state: DatabaseState::default(),
            block_index: HashMap::new(),
        };
        db.save()?;
        Ok(db)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StowageError::DatabaseNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let state: DatabaseState = rmp_serde::from_slice(&bytes)?;
        if state.version != DATABASE_VERSION {
            return Err(StowageError::InvalidFormat(format!(
                "unsupported database version {}",
                state.version
            )));
        }
        let block_index = state
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.hash.clone(), i))
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            state,
            block_index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole state to a temp file beside the database and rename it
    /// over the old file.
    pub fn save(&self) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(&self.state)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "saved database");
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.state.next_id;
        self.state.next_id += 1;
        id
    }

    // --- flags and options ---

    pub fn partially_recreated(&self) -> bool {
        self.state.partially_recreated
    }

    pub fn set_partially_recreated(&mut self, value: bool) {
        self.state.partially_recreated = value;
    }

    pub fn repair_in_progress(&self) -> bool {
        self.state.repair_in_progress
    }

    pub fn set_repair_in_progress(&mut self, value: bool) {
        self.state.repair_in_progress = value;
    }

    pub fn stored_options(&self) -> &StoredOptions {
        &self.state.options
    }

    pub fn set_stored_options(&mut self, options: StoredOptions) {
        self.state.options = options;
    }

    // --- remote volumes ---

    pub fn remote_volumes(&self) -> impl Iterator<Item = &RemoteVolumeRecord> {
        self.state.volumes.values()
    }

    pub fn remote_volume_count(&self) -> usize {
        self.state.volumes.len()
    }

    pub fn volume(&self, id: VolumeId) -> Option<&RemoteVolumeRecord> {
        self.state.volumes.get(&id)
    }

    /// The newest record carrying `name`.
    pub fn volume_by_name(&self, name: &str) -> Option<&RemoteVolumeRecord> {
        self.state.volumes.values().rev().find(|v| v.name == name)
    }

    /// Create a record for `name`, or move the existing one to `state`.
    pub fn register_remote_volume(
        &mut self,
        name: &str,
        kind: VolumeKind,
        state: VolumeState,
    ) -> VolumeId {
        if let Some(id) = self.volume_by_name(name).map(|v| v.id) {
            if let Some(v) = self.state.volumes.get_mut(&id) {
                v.kind = kind;
                v.state = state;
            }
            return id;
        }
        let id = self.next_id();
        self.state.volumes.insert(
            id,
            RemoteVolumeRecord {
                id,
                name: name.to_string(),
                kind,
                state,
                size: None,
                hash: None,
            },
        );
        id
    }

    /// Set the state of `name`; `size`/`hash` replace the stored values when given.
    pub fn update_remote_volume(
        &mut self,
        name: &str,
        state: VolumeState,
        size: Option<u64>,
        hash: Option<Digest>,
    ) -> Result<()> {
        let id = self
            .volume_by_name(name)
            .map(|v| v.id)
            .ok_or_else(|| StowageError::VolumeNotFound(name.to_string()))?;
        if let Some(v) = self.state.volumes.get_mut(&id) {
            v.state = state;
            if size.is_some() {
                v.size = size;
            }
            if hash.is_some() {
                v.hash = hash;
            }
        }
        Ok(())
    }

    // --- blocks ---

    /// Record a block stored in `volume_id`. Returns `false` if the hash is
    /// already known.
    pub fn add_block(&mut self, hash: Digest, size: u32, volume_id: VolumeId) -> bool {
        if self.block_index.contains_key(&hash) {
            return false;
        }
        self.block_index.insert(hash.clone(), self.state.blocks.len());
        self.state.blocks.push(BlockRecord {
            hash,
            size,
            volume_id,
        });
        true
    }

    pub fn block(&self, hash: &Digest) -> Option<&BlockRecord> {
        self.block_index.get(hash).map(|&i| &self.state.blocks[i])
    }

    pub fn add_duplicate_block(&mut self, hash: Digest, volume_id: VolumeId) {
        self.state
            .duplicate_blocks
            .push(DuplicateBlockRecord { hash, volume_id });
    }

    /// Forget the extra copies recorded for a volume that was rewritten.
    pub fn remove_duplicate_blocks(&mut self, volume_id: VolumeId) -> usize {
        let before = self.state.duplicate_blocks.len();
        self.state
            .duplicate_blocks
            .retain(|d| d.volume_id != volume_id);
        before - self.state.duplicate_blocks.len()
    }

    /// `(hash, size)` of every block whose home is `volume_id`, in insertion order.
    pub fn blocks_in_volume(&self, volume_id: VolumeId) -> Vec<(Digest, u32)> {
        self.state
            .blocks
            .iter()
            .filter(|b| b.volume_id == volume_id)
            .map(|b| (b.hash.clone(), b.size))
            .collect()
    }

    fn is_duplicate_in(&self, hash: &Digest, volume_id: VolumeId) -> bool {
        self.state
            .duplicate_blocks
            .iter()
            .any(|d| d.volume_id == volume_id && &d.hash == hash)
    }

    /// Whether `volume_id` holds `hash`, as its home or as a recorded copy.
    pub fn block_belongs_to(&self, hash: &Digest, volume_id: VolumeId) -> bool {
        self.block(hash).is_some_and(|b| b.volume_id == volume_id)
            || self.is_duplicate_in(hash, volume_id)
    }

    // --- blocksets, files, filesets ---

    pub fn add_blockset(&mut self, length: u64, full_hash: Digest, blocks: Vec<Digest>) -> u64 {
        let id = self.next_id();
        self.state.blocksets.insert(
            id,
            BlocksetRecord {
                id,
                length,
                full_hash,
                blocks,
            },
        );
        id
    }

    pub fn blockset(&self, id: u64) -> Option<&BlocksetRecord> {
        self.state.blocksets.get(&id)
    }

    pub fn add_blocklist_hash(&mut self, blockset_id: u64, index: u32, hash: Digest) {
        self.state.blocklist_hashes.push(BlocklistHashRecord {
            blockset_id,
            index,
            hash,
        });
    }

    pub fn blocklist_hashes(&self) -> &[BlocklistHashRecord] {
        &self.state.blocklist_hashes
    }

    pub fn add_metadataset(&mut self, blockset_id: u64) -> u64 {
        let id = self.next_id();
        self.state
            .metadatasets
            .insert(id, MetadatasetRecord { id, blockset_id });
        id
    }

    pub fn metadatasets(&self) -> impl Iterator<Item = &MetadatasetRecord> {
        self.state.metadatasets.values()
    }

    pub fn add_file_entry(&mut self, path: &str, blockset_id: u64, metadata_id: Option<u64>) -> u64 {
        let id = self.next_id();
        self.state.files.insert(
            id,
            FileEntryRecord {
                id,
                path: path.to_string(),
                blockset_id,
                metadata_id,
            },
        );
        id
    }

    pub fn file_entries(&self) -> impl Iterator<Item = &FileEntryRecord> {
        self.state.files.values()
    }

    pub fn add_fileset(
        &mut self,
        volume_id: VolumeId,
        timestamp: DateTime<Utc>,
        file_ids: Vec<u64>,
    ) -> u64 {
        let id = self.next_id();
        self.state.filesets.insert(
            id,
            FilesetRecord {
                id,
                volume_id,
                timestamp,
                file_ids,
            },
        );
        id
    }

    pub fn filesets(&self) -> impl Iterator<Item = &FilesetRecord> {
        self.state.filesets.values()
    }

    pub fn fileset_for_volume(&self, volume_id: VolumeId) -> Option<&FilesetRecord> {
        self.state
            .filesets
            .values()
            .find(|f| f.volume_id == volume_id)
    }

    /// Rebuild the manifest a `Files` volume carries from the stored records.
    pub fn fileset_manifest(&self, fileset_id: u64) -> Result<FilesetManifest> {
        let fileset = self
            .state
            .filesets
            .get(&fileset_id)
            .ok_or_else(|| StowageError::Other(format!("unknown fileset id {fileset_id}")))?;
        let mut manifest = FilesetManifest::new(fileset.timestamp);

        for file_id in &fileset.file_ids {
            let file = self.state.files.get(file_id).ok_or_else(|| {
                StowageError::InternalConsistency(format!(
                    "fileset {fileset_id} references missing file entry {file_id}"
                ))
            })?;
            let blockset = self.blockset(file.blockset_id).ok_or_else(|| {
                StowageError::InternalConsistency(format!(
                    "file '{}' references missing blockset {}",
                    file.path, file.blockset_id
                ))
            })?;
            let metahash = file
                .metadata_id
                .and_then(|m| self.state.metadatasets.get(&m))
                .and_then(|m| self.blockset(m.blockset_id))
                .map(|b| b.full_hash.to_hex());

            let mut lists: Vec<&BlocklistHashRecord> = self
                .state
                .blocklist_hashes
                .iter()
                .filter(|r| r.blockset_id == blockset.id)
                .collect();
            lists.sort_by_key(|r| r.index);
            lists.dedup_by_key(|r| r.index);

            manifest.entries.push(FilesetEntry {
                path: file.path.clone(),
                size: blockset.length,
                hash: blockset.full_hash.to_hex(),
                metahash,
                blocklists: lists.iter().map(|r| r.hash.to_hex()).collect(),
            });
        }
        Ok(manifest)
    }

    // --- index links ---

    pub fn add_index_block_link(&mut self, index_volume_id: VolumeId, block_volume_id: VolumeId) {
        let link = IndexBlockLink {
            index_volume_id,
            block_volume_id,
        };
        if !self.state.index_links.contains(&link) {
            self.state.index_links.push(link);
        }
    }

    pub fn block_volumes_for_index(&self, index_volume_id: VolumeId) -> Vec<&RemoteVolumeRecord> {
        self.state
            .index_links
            .iter()
            .filter(|l| l.index_volume_id == index_volume_id)
            .filter_map(|l| self.volume(l.block_volume_id))
            .collect()
    }

    pub fn index_volumes_for_block(&self, block_volume_id: VolumeId) -> Vec<&RemoteVolumeRecord> {
        self.state
            .index_links
            .iter()
            .filter(|l| l.block_volume_id == block_volume_id)
            .filter_map(|l| self.volume(l.index_volume_id))
            .collect()
    }

    // --- blocklists ---

    /// Content of the blocklist block named `hash`, derived from the blockset
    /// that records it.
    pub fn blocklist_content(&self, hash: &Digest, per_blocklist: usize) -> Option<Vec<u8>> {
        self.state
            .blocklist_hashes
            .iter()
            .filter(|r| &r.hash == hash)
            .find_map(|r| {
                let blockset = self.blockset(r.blockset_id)?;
                blocklist::blocklist_chunk(&blockset.blocks, r.index as usize, per_blocklist)
            })
    }

    /// Blocklist blocks stored in `volume_id`, as `(hash, content)`.
    pub fn blocklists_for_volume(
        &self,
        volume_id: VolumeId,
        per_blocklist: usize,
    ) -> Vec<(Digest, Vec<u8>)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in &self.state.blocklist_hashes {
            let in_volume = self
                .block(&record.hash)
                .is_some_and(|b| b.volume_id == volume_id);
            if !in_volume || !seen.insert(record.hash.clone()) {
                continue;
            }
            let Some(blockset) = self.blockset(record.blockset_id) else {
                continue;
            };
            if let Some(data) =
                blocklist::blocklist_chunk(&blockset.blocks, record.index as usize, per_blocklist)
            {
                out.push((record.hash.clone(), data));
            }
        }
        out
    }

    // --- consistency checks ---

    /// An index claim about `volume_id` must list exactly the blocks the
    /// database places there, with matching sizes.
    pub fn check_all_blocks_are_in_volume(
        &self,
        volume_id: VolumeId,
        blocks: &[IndexedBlock],
    ) -> Result<()> {
        let name = self
            .volume(volume_id)
            .map(|v| v.name.as_str())
            .unwrap_or("?");
        let mut claimed = HashSet::new();
        for b in blocks {
            match self.block(&b.hash) {
                Some(rec) if rec.volume_id == volume_id || self.is_duplicate_in(&b.hash, volume_id) => {
                    if rec.size != b.size {
                        return Err(StowageError::Other(format!(
                            "block {} in {name} has size {} but the database says {}",
                            b.hash, b.size, rec.size
                        )));
                    }
                }
                _ => {
                    return Err(StowageError::Other(format!(
                        "block {} is not recorded in volume {name}",
                        b.hash
                    )));
                }
            }
            claimed.insert(&b.hash);
        }
        let expected = self
            .state
            .blocks
            .iter()
            .filter(|b| b.volume_id == volume_id)
            .filter(|b| !claimed.contains(&b.hash))
            .count();
        if expected > 0 {
            return Err(StowageError::Other(format!(
                "index omits {expected} blocks recorded in volume {name}"
            )));
        }
        Ok(())
    }

    /// A blocklist carried by an index must be one the database knows, with
    /// the same content.
    pub fn check_blocklist_correct(
        &self,
        hash: &Digest,
        data: &[u8],
        per_blocklist: usize,
    ) -> Result<()> {
        match self.blocklist_content(hash, per_blocklist) {
            Some(expected) if expected == data => Ok(()),
            Some(_) => Err(StowageError::Other(format!(
                "blocklist {hash} does not match the database"
            ))),
            None => Err(StowageError::Other(format!("unknown blocklist {hash}"))),
        }
    }

    // --- recovery queries ---

    /// Names of trusted volumes other than `exclude` that hold a copy of any
    /// of `hashes`.
    pub fn missing_block_sources(
        &self,
        exclude: VolumeId,
        hashes: &HashSet<Digest>,
    ) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for b in &self.state.blocks {
            if b.volume_id != exclude && hashes.contains(&b.hash) {
                ids.insert(b.volume_id);
            }
        }
        for d in &self.state.duplicate_blocks {
            if d.volume_id != exclude && hashes.contains(&d.hash) {
                ids.insert(d.volume_id);
            }
        }
        ids.into_iter()
            .filter_map(|id| self.volume(id))
            .filter(|v| v.kind == VolumeKind::Blocks && v.state.is_trusted())
            .map(|v| v.name.clone())
            .collect()
    }

    /// Names of the `Files` volumes whose snapshot needs any of `hashes`.
    pub fn filesets_using_blocks(&self, hashes: &HashSet<Digest>) -> Vec<String> {
        let blockset_hit = |id: u64| -> bool {
            let in_blocks = self
                .blockset(id)
                .is_some_and(|bs| bs.blocks.iter().any(|h| hashes.contains(h)));
            in_blocks
                || self
                    .state
                    .blocklist_hashes
                    .iter()
                    .any(|r| r.blockset_id == id && hashes.contains(&r.hash))
        };

        let mut names = BTreeSet::new();
        for fileset in self.state.filesets.values() {
            let uses = fileset.file_ids.iter().any(|fid| {
                self.state.files.get(fid).is_some_and(|f| {
                    blockset_hit(f.blockset_id)
                        || f.metadata_id
                            .and_then(|m| self.state.metadatasets.get(&m))
                            .is_some_and(|m| blockset_hit(m.blockset_id))
                })
            });
            if uses {
                if let Some(v) = self.volume(fileset.volume_id) {
                    names.insert(v.name.clone());
                }
            }
        }
        names.into_iter().collect()
    }
}
