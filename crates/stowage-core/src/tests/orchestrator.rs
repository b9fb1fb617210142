use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use stowage_storage::ObjectStore;

use crate::commands::repair::{run_with_backend, LogLevel, RepairRequest};
use crate::config::StowageConfig;
use crate::db::{LocalDatabase, VolumeState};
use crate::error::StowageError;
use crate::testutil::MemoryBackend;
use crate::volume::{generate_volume_name, VolumeKind};

use super::helpers::{backup, messages, patterned, repair, request, Fixture, StubRecreator};

struct Bare {
    dir: tempfile::TempDir,
    config: StowageConfig,
    store: Arc<dyn ObjectStore>,
}

impl Bare {
    fn db_path(&self) -> PathBuf {
        self.dir.path().join("local.db")
    }
}

fn bare() -> Bare {
    let dir = tempfile::tempdir().unwrap();
    let config = StowageConfig::new(
        dir.path().join("remote").to_string_lossy().to_string(),
        dir.path().join("local.db").to_string_lossy().to_string(),
    );
    Bare {
        dir,
        config,
        store: Arc::new(MemoryBackend::new()),
    }
}

#[test]
fn passphrase_change_is_refused() {
    let env = bare();
    let recreator = StubRecreator::default();
    let req = RepairRequest {
        allow_passphrase_change: true,
        ..RepairRequest::default()
    };
    let err = run_with_backend(&env.config, &req, Arc::clone(&env.store), &recreator, None).unwrap_err();
    assert!(matches!(err, StowageError::PassphraseChangeUnsupported));
    assert!(recreator.calls.lock().unwrap().is_empty());
}

#[test]
fn missing_database_is_recreated_in_place() {
    let env = bare();
    let recreator = StubRecreator::default();
    let result =
        run_with_backend(&env.config, &request(false), Arc::clone(&env.store), &recreator, None).unwrap();

    assert_eq!(*recreator.calls.lock().unwrap(), vec![env.db_path()]);
    let recreated = result.recreated.unwrap();
    assert_eq!(recreated.database, env.db_path());
    assert_eq!(recreated.previous, None);
    assert!(LocalDatabase::exists(&env.db_path()));
    assert_eq!(result.progress, 1.0);
    assert!(result.end_time.is_some());
}

#[test]
fn dry_run_recreates_into_scratch() {
    let env = bare();
    let recreator = StubRecreator::default();
    let result =
        run_with_backend(&env.config, &request(true), Arc::clone(&env.store), &recreator, None).unwrap();

    let calls = recreator.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_ne!(calls[0], env.db_path());
    assert!(calls[0].ends_with("recreate.db"));
    assert!(!calls[0].exists());
    assert!(!env.db_path().exists());
    assert!(result.recreated.is_none());
}

#[test]
fn empty_database_is_moved_aside() {
    let env = bare();
    LocalDatabase::create(&env.db_path()).unwrap();
    let recreator = StubRecreator::default();

    let result =
        run_with_backend(&env.config, &request(false), Arc::clone(&env.store), &recreator, None).unwrap();

    let backup = env.dir.path().join("local.db.backup");
    assert!(backup.is_file());
    assert!(messages(&result)
        .iter()
        .any(|m| m.starts_with("Renaming existing db from")));
    assert_eq!(result.recreated.unwrap().previous, Some(backup));
    assert_eq!(recreator.calls.lock().unwrap().len(), 1);
}

#[test]
fn backup_name_skips_taken_suffixes() {
    let env = bare();
    LocalDatabase::create(&env.db_path()).unwrap();
    std::fs::write(env.dir.path().join("local.db.backup"), b"older").unwrap();
    let recreator = StubRecreator::default();

    let result =
        run_with_backend(&env.config, &request(false), Arc::clone(&env.store), &recreator, None).unwrap();

    let expected = env.dir.path().join("local.db.backup-1");
    assert!(expected.is_file());
    assert_eq!(result.recreated.unwrap().previous, Some(expected));
    assert_eq!(std::fs::read(env.dir.path().join("local.db.backup")).unwrap(), b"older");
}

#[test]
fn unreadable_database_is_moved_aside_with_a_warning() {
    let env = bare();
    std::fs::write(env.db_path(), b"garbage").unwrap();
    let recreator = StubRecreator::default();

    let result =
        run_with_backend(&env.config, &request(false), Arc::clone(&env.store), &recreator, None).unwrap();

    assert!(result
        .entries_at(LogLevel::Warning)
        .any(|e| e.message.starts_with("Failed to read local db")));
    assert!(env.dir.path().join("local.db.backup").is_file());
    assert_eq!(recreator.calls.lock().unwrap().len(), 1);
}

#[test]
fn empty_database_under_dry_run_is_left_alone() {
    let env = bare();
    LocalDatabase::create(&env.db_path()).unwrap();
    let before = std::fs::read(env.db_path()).unwrap();
    let recreator = StubRecreator::default();

    let result =
        run_with_backend(&env.config, &request(true), Arc::clone(&env.store), &recreator, None).unwrap();

    assert!(result
        .entries_at(LogLevel::DryRun)
        .any(|e| e.message == "Performing dryrun recreate"));
    assert_eq!(std::fs::read(env.db_path()).unwrap(), before);
    assert!(!env.dir.path().join("local.db.backup").exists());
}

#[test]
fn partially_recreated_database_is_guarded() {
    let fx = backup(&[("a.bin", patterned(1, 1500))]);
    {
        let mut db = fx.open_db();
        db.set_partially_recreated(true);
        db.save().unwrap();
    }
    fx.memory.remove(&fx.files_volume);

    let err = repair(&fx, false).unwrap_err();
    assert!(matches!(err, StowageError::DataLossGuard(ref m) if m.contains("partially recreated")));
    assert!(fx.log.entries().is_empty());
}

#[test]
fn interrupted_repair_is_guarded() {
    let fx = backup(&[("a.bin", patterned(1, 1500))]);
    {
        let mut db = fx.open_db();
        db.set_repair_in_progress(true);
        db.save().unwrap();
    }

    let err = repair(&fx, true).unwrap_err();
    assert!(matches!(err, StowageError::DataLossGuard(ref m) if m.contains("did not complete")));
}

#[test]
fn synchronized_destination_changes_nothing() {
    let fx = backup(&[("a.bin", patterned(1, 3000)), ("b.bin", patterned(2, 10))]);
    let before = std::fs::read(fx.db_path()).unwrap();

    let result = repair(&fx, false).unwrap();
    assert_eq!(
        messages(&result),
        vec!["Destination and database are synchronized, not making any changes".to_string()]
    );
    assert!(fx.log.entries().is_empty());
    assert_eq!(result.progress, 1.0);
    assert_eq!(fx.open_db().remote_volume_count(), 3);
    assert_eq!(std::fs::read(fx.db_path()).unwrap().len(), before.len());
}

#[test]
fn dry_run_with_wrong_prefix_is_a_user_error() {
    let mut fx = backup(&[("a.bin", patterned(1, 1500))]);
    fx.config.repository.prefix = "nightly".into();

    let err = repair(&fx, true).unwrap_err();
    assert!(matches!(err, StowageError::User(ref m) if m.contains("prefix stowage")));
    assert!(fx.log.entries().is_empty());
}

#[test]
fn foreign_prefixed_remote_does_not_stop_a_real_repair() {
    let fx = backup(&[("a.bin", patterned(1, 1500))]);
    for name in [&fx.blocks_volume, &fx.index_volume, &fx.files_volume] {
        fx.memory.remove(name);
    }
    let foreign = generate_volume_name("nightly", VolumeKind::Files, Utc::now());
    fx.memory.overwrite(&foreign, b"someone else's fileset".to_vec());

    let result = repair(&fx, false).unwrap();
    assert!(!result.has_errors(), "{:?}", messages(&result));
    assert_eq!(fx.log.puts().len(), 3);
    assert!(fx.log.deletes().is_empty());
    assert!(fx.memory.exists(&foreign).unwrap());
    for name in [&fx.blocks_volume, &fx.index_volume, &fx.files_volume] {
        assert_eq!(fx.state_of(name), VolumeState::Uploaded);
    }
}

fn mark_all_deleted(fx: &Fixture) {
    let mut db = fx.open_db();
    for name in [&fx.blocks_volume, &fx.index_volume, &fx.files_volume] {
        db.update_remote_volume(name, VolumeState::Deleted, None, None)
            .unwrap();
    }
    db.save().unwrap();
}

#[test]
fn dry_run_with_only_unknown_volumes_suggests_recreate() {
    let fx = backup(&[("a.bin", patterned(1, 1500))]);
    mark_all_deleted(&fx);

    let err = repair(&fx, true).unwrap_err();
    assert!(matches!(err, StowageError::User(ref m) if m.contains("did you mean to recreate")));
}

#[test]
fn real_repair_removes_volumes_the_database_retired() {
    let fx = backup(&[("a.bin", patterned(1, 1500))]);
    mark_all_deleted(&fx);

    let result = repair(&fx, false).unwrap();
    let mut deleted = fx.log.deletes();
    deleted.sort();
    let mut expected = vec![
        fx.blocks_volume.clone(),
        fx.index_volume.clone(),
        fx.files_volume.clone(),
    ];
    expected.sort();
    assert_eq!(deleted, expected, "{:?}", messages(&result));
    assert!(fx.memory.names().is_empty());
    for name in &expected {
        assert_eq!(fx.state_of(name), VolumeState::Deleted);
    }
}

#[test]
fn conflicting_block_size_is_refused() {
    let mut fx = backup(&[("a.bin", patterned(1, 1500))]);
    fx.config.blocks.block_size = Some(2048);

    let err = repair(&fx, false).unwrap_err();
    assert!(matches!(err, StowageError::User(ref m) if m.contains("block size")));
}
