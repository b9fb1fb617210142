use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use stowage_storage::ObjectStore;
use stowage_types::Digest;

use crate::backend::RemoteVolumes;
use crate::blocklist;
use crate::commands::check::{check_volumes, CheckResult};
use crate::commands::repair::{DatabaseRecreator, RepairRequest, RepairResult};
use crate::config::StowageConfig;
use crate::db::{LocalDatabase, VolumeState};
use crate::error::{Result, StowageError};
use crate::filter::{FilesetFilter, PathFilter};
use crate::options::EngineOptions;
use crate::testutil::{MemoryBackend, OpLog, RecordingBackend};
use crate::volume::blocks::BlockVolumeWriter;
use crate::volume::index::IndexVolumeWriter;
use crate::volume::{generate_volume_name, VolumeKind};

pub const TEST_BLOCK_SIZE: u32 = 1024;

/// Deterministic, non-repeating content so every block is distinct.
pub fn patterned(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32 * 7919) as u8 ^ (i / 251) as u8)
        .collect()
}

/// A small finished backup: one blocks volume, one index volume, one
/// fileset volume, a local database describing them, and the source files.
pub struct Fixture {
    _dir: tempfile::TempDir,
    pub config: StowageConfig,
    pub memory: Arc<MemoryBackend>,
    pub log: OpLog,
    pub store: Arc<dyn ObjectStore>,
    pub blocks_volume: String,
    pub index_volume: String,
    pub files_volume: String,
    pub sources: Vec<PathBuf>,
}

impl Fixture {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.config.database.path)
    }

    pub fn open_db(&self) -> LocalDatabase {
        LocalDatabase::open(&self.db_path()).unwrap()
    }

    pub fn options(&self) -> EngineOptions {
        let mut db = self.open_db();
        EngineOptions::resolve(&self.config, &mut db).unwrap()
    }

    pub fn state_of(&self, name: &str) -> VolumeState {
        self.open_db().volume_by_name(name).unwrap().state
    }
}

/// Build a backup of `files` (name, content) with the default index policy.
pub fn backup(files: &[(&str, Vec<u8>)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source_dir = dir.path().join("source");
    std::fs::create_dir_all(&source_dir).unwrap();

    let db_path = dir.path().join("local.db");
    let mut config = StowageConfig::new(
        dir.path().join("remote").to_string_lossy().to_string(),
        db_path.to_string_lossy().to_string(),
    );
    config.blocks.block_size = Some(TEST_BLOCK_SIZE);

    let memory = Arc::new(MemoryBackend::new());
    let (recording, log) = RecordingBackend::new(Arc::clone(&memory));
    let store: Arc<dyn ObjectStore> = Arc::new(recording);

    let mut db = LocalDatabase::create(&db_path).unwrap();
    let options = EngineOptions::resolve(&config, &mut db).unwrap();
    let hasher = options.hasher.clone();
    let per = options.hashes_per_blocklist();
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

    let blocks_volume = generate_volume_name("stowage", VolumeKind::Blocks, ts);
    let blocks_id = db.register_remote_volume(&blocks_volume, VolumeKind::Blocks, VolumeState::Temporary);
    let mut writer = BlockVolumeWriter::new(options.compression);

    let mut sources = Vec::new();
    let mut file_ids = Vec::new();
    for (name, content) in files {
        let path = source_dir.join(name);
        std::fs::write(&path, content).unwrap();

        let mut hashes = Vec::new();
        for chunk in content.chunks(TEST_BLOCK_SIZE as usize) {
            let hash = hasher.hash(chunk);
            if db.add_block(hash.clone(), chunk.len() as u32, blocks_id) {
                writer.add_block(&hash, chunk).unwrap();
            }
            hashes.push(hash);
        }
        let blockset = db.add_blockset(content.len() as u64, hasher.hash(content), hashes.clone());
        for (i, (hash, data)) in blocklist::build_blocklists(&hashes, per, &hasher)
            .into_iter()
            .enumerate()
        {
            db.add_blocklist_hash(blockset, i as u32, hash.clone());
            if db.add_block(hash.clone(), data.len() as u32, blocks_id) {
                writer.add_block(&hash, &data).unwrap();
            }
        }
        file_ids.push(db.add_file_entry(&path.to_string_lossy(), blockset, None));
        sources.push(path);
    }

    let blocks_bytes = writer.finish().unwrap();
    put_verified(&mut db, store.as_ref(), &hasher, &blocks_volume, VolumeKind::Blocks, blocks_bytes);

    let index_volume = generate_volume_name("stowage", VolumeKind::Index, ts);
    let index_id = db.register_remote_volume(&index_volume, VolumeKind::Index, VolumeState::Temporary);
    db.add_index_block_link(index_id, blocks_id);
    let index_bytes = index_bytes_for(&db, &options, &[blocks_volume.as_str()]).unwrap();
    put_verified(&mut db, store.as_ref(), &hasher, &index_volume, VolumeKind::Index, index_bytes);

    let files_volume = generate_volume_name("stowage", VolumeKind::Files, ts);
    let files_id = db.register_remote_volume(&files_volume, VolumeKind::Files, VolumeState::Temporary);
    let fileset = db.add_fileset(files_id, ts, file_ids);
    let manifest = db.fileset_manifest(fileset).unwrap().to_bytes().unwrap();
    put_verified(&mut db, store.as_ref(), &hasher, &files_volume, VolumeKind::Files, manifest);

    db.save().unwrap();
    log.clear();

    Fixture {
        _dir: dir,
        config,
        memory,
        log,
        store,
        blocks_volume,
        index_volume,
        files_volume,
        sources,
    }
}

fn put_verified(
    db: &mut LocalDatabase,
    store: &dyn ObjectStore,
    hasher: &stowage_types::ContentHasher,
    name: &str,
    kind: VolumeKind,
    data: Vec<u8>,
) {
    store.put(name, &data).unwrap();
    db.register_remote_volume(name, kind, VolumeState::Uploaded);
    db.update_remote_volume(
        name,
        VolumeState::Verified,
        Some(data.len() as u64),
        Some(hasher.hash(&data)),
    )
    .unwrap();
}

/// Serialize an index volume describing `volumes` the way the database
/// records them, blocklists included.
pub fn index_bytes_for(db: &LocalDatabase, options: &EngineOptions, volumes: &[&str]) -> Result<Vec<u8>> {
    let per = options.hashes_per_blocklist();
    let mut w = IndexVolumeWriter::new();
    for name in volumes {
        let rec = db
            .volume_by_name(name)
            .ok_or_else(|| StowageError::VolumeNotFound(name.to_string()))?;
        w.start_volume(name);
        for (hash, size) in db.blocks_in_volume(rec.id) {
            w.add_block(hash, size)?;
        }
        w.finish_volume(
            rec.hash.clone().unwrap_or_else(|| Digest(vec![0; 32])),
            rec.size.unwrap_or_default(),
        )?;
        for (hash, data) in db.blocklists_for_volume(rec.id, per) {
            w.write_blocklist(hash, data);
        }
    }
    w.finish()
}

/// Recreator that writes an empty database and records that it ran.
#[derive(Default)]
pub struct StubRecreator {
    pub calls: std::sync::Mutex<Vec<PathBuf>>,
}

impl DatabaseRecreator for StubRecreator {
    fn recreate(
        &self,
        _config: &StowageConfig,
        db_path: &Path,
        _filter: &PathFilter,
        _filesets: &FilesetFilter,
        result: &mut RepairResult,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(db_path.to_path_buf());
        LocalDatabase::create(db_path)?;
        result.add_message(format!("recreated {}", db_path.display()));
        Ok(())
    }
}

pub fn request(dry_run: bool) -> RepairRequest {
    RepairRequest {
        dry_run,
        ..RepairRequest::default()
    }
}

/// Run a repair on the fixture's store with a recreator that must not be used.
pub fn repair(fx: &Fixture, dry_run: bool) -> Result<RepairResult> {
    let recreator = StubRecreator::default();
    let result = crate::commands::repair::run_with_backend(
        &fx.config,
        &request(dry_run),
        Arc::clone(&fx.store),
        &recreator,
        None,
    );
    assert!(recreator.calls.lock().unwrap().is_empty());
    result
}

pub fn messages(result: &RepairResult) -> Vec<String> {
    result.entries.iter().map(|e| e.message.clone()).collect()
}

/// Run the integrity check against the fixture's store.
pub fn check(fx: &Fixture) -> CheckResult {
    let db = fx.open_db();
    let options = fx.options();
    let backend = RemoteVolumes::new(Arc::clone(&fx.store), options.hasher.clone(), 1);
    check_volumes(&db, &backend, &options, None).unwrap()
}
