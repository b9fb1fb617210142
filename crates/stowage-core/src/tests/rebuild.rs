use chrono::Utc;
use stowage_storage::ObjectStore;

use crate::commands::repair::LogLevel;
use crate::db::VolumeState;
use crate::error::StowageError;
use crate::volume::blocks::BlockVolumeReader;
use crate::volume::index::read_index_volume;
use crate::volume::{generate_volume_name, VolumeKind};

use super::helpers::{backup, check, messages, patterned, repair, Fixture, TEST_BLOCK_SIZE};

fn two_files() -> Fixture {
    backup(&[
        ("one.bin", patterned(1, 3 * TEST_BLOCK_SIZE as usize)),
        ("two.bin", patterned(2, 700)),
    ])
}

fn stored(fx: &Fixture, name: &str) -> Vec<u8> {
    fx.memory.get(name).unwrap().unwrap()
}

/// Flip one byte inside the second block of the first source file.
fn damage_middle_block(fx: &Fixture) {
    let path = &fx.sources[0];
    let mut data = std::fs::read(path).unwrap();
    data[TEST_BLOCK_SIZE as usize + 10] ^= 0x55;
    std::fs::write(path, data).unwrap();
}

#[test]
fn blocks_volume_rebuilt_from_local_files() {
    let fx = two_files();
    fx.memory.remove(&fx.blocks_volume);

    let result = repair(&fx, false).unwrap();
    assert!(!result.has_errors(), "{:?}", messages(&result));
    assert!(messages(&result)
        .iter()
        .any(|m| m.starts_with(&format!("Re-uploading block file {}", fx.blocks_volume))));

    let puts = fx.log.puts();
    assert!(puts.contains(&fx.blocks_volume));
    assert!(puts.contains(&fx.index_volume), "linked index refreshed: {puts:?}");

    let db = fx.open_db();
    let rec = db.volume_by_name(&fx.blocks_volume).unwrap();
    assert_eq!(rec.state, VolumeState::Uploaded);
    let data = stored(&fx, &fx.blocks_volume);
    assert_eq!(rec.size, Some(data.len() as u64));
    let hasher = fx.options().hasher;
    let reader = BlockVolumeReader::open(&data).unwrap();
    assert_eq!(reader.entries().len(), db.blocks_in_volume(rec.id).len());
    for (entry, content) in reader.blocks() {
        assert_eq!(hasher.hash(&content.unwrap()), entry.hash);
    }
    drop(db);

    let report = check(&fx);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.volumes_checked, 3);

    fx.log.clear();
    let again = repair(&fx, false).unwrap();
    assert!(messages(&again)
        .iter()
        .any(|m| m.contains("synchronized")));
    assert!(fx.log.entries().is_empty());
}

#[test]
fn unrecoverable_block_aborts_without_uploading() {
    let fx = backup(&[("one.bin", patterned(5, 3 * TEST_BLOCK_SIZE as usize))]);
    fx.memory.remove(&fx.blocks_volume);
    damage_middle_block(&fx);

    let err = repair(&fx, false).unwrap_err();
    match err {
        StowageError::MissingBlocks {
            count,
            volume,
            filesets,
        } => {
            assert_eq!(count, 1);
            assert_eq!(volume, fx.blocks_volume);
            assert_eq!(filesets, vec![fx.files_volume.clone()]);
        }
        other => panic!("expected MissingBlocks, got {other:?}"),
    }
    assert!(fx.log.puts().is_empty());
    assert_eq!(fx.state_of(&fx.blocks_volume), VolumeState::Verified);
}

#[test]
fn unrecoverable_block_is_reported_under_dry_run() {
    let fx = backup(&[("one.bin", patterned(5, 3 * TEST_BLOCK_SIZE as usize))]);
    fx.memory.remove(&fx.blocks_volume);
    damage_middle_block(&fx);

    let result = repair(&fx, true).unwrap();
    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("missing 1 blocks"));
    assert!(!result
        .entries_at(LogLevel::DryRun)
        .any(|e| e.message.contains("would re-upload block file")));
    assert!(fx.log.entries().is_empty());
}

#[test]
fn blocks_recovered_from_a_remote_copy() {
    let fx = two_files();
    let options = fx.options();
    let original = stored(&fx, &fx.blocks_volume);
    let copy = generate_volume_name("stowage", VolumeKind::Blocks, Utc::now());
    fx.memory.overwrite(&copy, original.clone());
    {
        let mut db = fx.open_db();
        let home = db.volume_by_name(&fx.blocks_volume).unwrap().id;
        let id = db.register_remote_volume(&copy, VolumeKind::Blocks, VolumeState::Uploaded);
        db.update_remote_volume(
            &copy,
            VolumeState::Verified,
            Some(original.len() as u64),
            Some(options.hasher.hash(&original)),
        )
        .unwrap();
        for (hash, _) in db.blocks_in_volume(home) {
            db.add_duplicate_block(hash, id);
        }
        db.save().unwrap();
    }
    fx.memory.remove(&fx.blocks_volume);
    for path in &fx.sources {
        std::fs::remove_file(path).unwrap();
    }

    let result = repair(&fx, false).unwrap();
    assert!(!result.has_errors(), "{:?}", messages(&result));
    assert!(result
        .entries_at(LogLevel::Warning)
        .any(|e| e.message.starts_with("Failed to access file")));
    assert!(fx.log.puts().contains(&fx.blocks_volume));

    let report = check(&fx);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.volumes_checked, 4);
}

#[test]
fn unreadable_remote_copy_is_a_warning() {
    let fx = backup(&[("one.bin", patterned(6, 2 * TEST_BLOCK_SIZE as usize))]);
    let copy = generate_volume_name("stowage", VolumeKind::Blocks, Utc::now());
    fx.memory.overwrite(&copy, b"not a volume".to_vec());
    {
        let mut db = fx.open_db();
        let home = db.volume_by_name(&fx.blocks_volume).unwrap().id;
        let id = db.register_remote_volume(&copy, VolumeKind::Blocks, VolumeState::Uploaded);
        db.update_remote_volume(&copy, VolumeState::Uploaded, Some(12), None)
            .unwrap();
        let (first, _) = db.blocks_in_volume(home)[0].clone();
        db.add_duplicate_block(first, id);
        db.save().unwrap();
    }
    fx.memory.remove(&fx.blocks_volume);
    std::fs::write(&fx.sources[0], b"short").unwrap();

    let result = repair(&fx, true).unwrap();
    assert!(result
        .entries_at(LogLevel::Warning)
        .any(|e| e.message.starts_with(&format!("Failed to read remote file: {copy}"))));
    assert!(result
        .errors()
        .any(|e| e.message.contains("Failed to perform verification")));
    assert!(result.errors().any(|e| e.message.contains("missing 2 blocks")));
}

#[test]
fn fileset_volume_rebuilt_byte_for_byte() {
    let fx = two_files();
    let original = stored(&fx, &fx.files_volume);
    fx.memory.remove(&fx.files_volume);

    let result = repair(&fx, false).unwrap();
    assert!(!result.has_errors(), "{:?}", messages(&result));
    assert_eq!(fx.log.puts(), vec![fx.files_volume.clone()]);
    assert_eq!(stored(&fx, &fx.files_volume), original);
    assert_eq!(fx.state_of(&fx.files_volume), VolumeState::Uploaded);
}

#[test]
fn index_volume_rebuilt_from_database() {
    let fx = two_files();
    let original = stored(&fx, &fx.index_volume);
    fx.memory.remove(&fx.index_volume);

    let result = repair(&fx, false).unwrap();
    assert!(!result.has_errors(), "{:?}", messages(&result));
    assert_eq!(fx.log.puts(), vec![fx.index_volume.clone()]);

    let rebuilt = stored(&fx, &fx.index_volume);
    assert_eq!(rebuilt, original);
    let contents = read_index_volume(&rebuilt).unwrap();
    assert_eq!(contents.volumes.len(), 1);
    assert_eq!(contents.volumes[0].name, fx.blocks_volume);
    assert_eq!(contents.blocklists.len(), 1);
}

#[test]
fn dry_run_reports_rebuilds_with_sizes() {
    let fx = two_files();
    fx.memory.remove(&fx.files_volume);

    let result = repair(&fx, true).unwrap();
    let line = result
        .entries_at(LogLevel::DryRun)
        .find(|e| e.message.starts_with("would re-upload fileset"))
        .map(|e| e.message.clone())
        .unwrap();
    assert!(line.contains(&fx.files_volume));
    assert!(line.contains("previous size"));
    assert!(fx.log.entries().is_empty());
    assert_eq!(fx.state_of(&fx.files_volume), VolumeState::Verified);
}

#[test]
fn wrong_blocklist_record_is_an_internal_consistency_error() {
    let fx = two_files();
    {
        let mut db = fx.open_db();
        let blockset = db
            .file_entries()
            .find(|f| f.path.ends_with("one.bin"))
            .map(|f| f.blockset_id)
            .unwrap();
        let first_block = db.blockset(blockset).unwrap().blocks[0].clone();
        db.add_blocklist_hash(blockset, 0, first_block);
        db.save().unwrap();
    }
    fx.memory.remove(&fx.index_volume);

    let result = repair(&fx, false).unwrap();
    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1, "{:?}", messages(&result));
    assert!(errors[0]
        .message
        .starts_with(&format!("Failed to perform cleanup for missing file: {}", fx.index_volume)));
    assert!(errors[0].message.contains("internal consistency check failed"));
    assert!(fx.log.puts().is_empty());
}

#[test]
fn failed_index_refresh_is_reported_against_the_index() {
    let fx = two_files();
    {
        let mut db = fx.open_db();
        let ghost = generate_volume_name("stowage", VolumeKind::Blocks, Utc::now());
        let ghost_id = db.register_remote_volume(&ghost, VolumeKind::Blocks, VolumeState::Deleted);
        let index_id = db.volume_by_name(&fx.index_volume).unwrap().id;
        db.add_index_block_link(index_id, ghost_id);
        db.save().unwrap();
    }
    fx.memory.remove(&fx.blocks_volume);

    let result = repair(&fx, false).unwrap();
    let errors: Vec<_> = result.entries_at(LogLevel::Error).collect();
    assert_eq!(errors.len(), 1, "{:?}", messages(&result));
    assert!(errors[0].message.starts_with(&format!(
        "Failed to refresh index file: {} for rebuilt {}",
        fx.index_volume, fx.blocks_volume
    )));
    assert!(fx.log.puts().contains(&fx.blocks_volume));
    assert_eq!(fx.state_of(&fx.blocks_volume), VolumeState::Uploaded);
}
