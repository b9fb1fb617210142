use std::path::Path;

use tracing::{debug, info};

use crate::backend::RemoteVolumes;
use crate::check::test_volume_internals;
use crate::config::{expand_tilde, StowageConfig};
use crate::db::LocalDatabase;
use crate::error::Result;
use crate::options::EngineOptions;
use crate::storage;

/// A single integrity issue found during check.
#[derive(Debug)]
pub struct CheckError {
    pub context: String,
    pub message: String,
}

/// Summary of a check run.
#[derive(Debug)]
pub struct CheckResult {
    pub volumes_checked: usize,
    pub volumes_skipped: usize,
    pub errors: Vec<CheckError>,
}

#[derive(Debug, Clone)]
pub enum CheckProgressEvent {
    VolumeStarted {
        current: usize,
        total: usize,
        name: String,
    },
}

fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(CheckProgressEvent)>,
    event: CheckProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

/// Run `stowage check`.
pub fn run(config: &StowageConfig) -> Result<CheckResult> {
    run_with_progress(config, None)
}

pub fn run_with_progress(
    config: &StowageConfig,
    progress: Option<&mut dyn FnMut(CheckProgressEvent)>,
) -> Result<CheckResult> {
    let db_path = expand_tilde(&config.database.path);
    let mut db = LocalDatabase::open(Path::new(&db_path))?;
    let options = EngineOptions::resolve(config, &mut db)?;
    let store = storage::backend_from_config(&config.repository)?;
    let backend = RemoteVolumes::new(store, options.hasher.clone(), 1);
    check_volumes(&db, &backend, &options, progress)
}

pub(crate) fn check_volumes(
    db: &LocalDatabase,
    backend: &RemoteVolumes,
    options: &EngineOptions,
    mut progress: Option<&mut dyn FnMut(CheckProgressEvent)>,
) -> Result<CheckResult> {
    let targets: Vec<_> = db
        .remote_volumes()
        .filter(|v| v.state.is_trusted())
        .cloned()
        .collect();
    let volumes_skipped = db.remote_volume_count() - targets.len();

    let mut errors: Vec<CheckError> = Vec::new();
    let mut volumes_checked = 0;
    let total = targets.len();

    for (i, record) in targets.iter().enumerate() {
        emit_progress(
            &mut progress,
            CheckProgressEvent::VolumeStarted {
                current: i + 1,
                total,
                name: record.name.clone(),
            },
        );

        let downloaded = match backend.get_with_info(&record.name) {
            Ok(d) => d,
            Err(e) => {
                errors.push(CheckError {
                    context: format!("volume '{}'", record.name),
                    message: format!("failed to download: {e}"),
                });
                continue;
            }
        };
        volumes_checked += 1;

        if record.size.is_some_and(|s| s != downloaded.size) {
            errors.push(CheckError {
                context: format!("volume '{}'", record.name),
                message: format!(
                    "size is {} but the database records {}",
                    downloaded.size,
                    record.size.unwrap_or_default()
                ),
            });
        }
        if record.hash.as_ref().is_some_and(|h| *h != downloaded.hash) {
            errors.push(CheckError {
                context: format!("volume '{}'", record.name),
                message: "hash does not match the database".into(),
            });
        }

        for problem in test_volume_internals(db, record, &downloaded.data, options) {
            errors.push(CheckError {
                context: format!("volume '{}'", record.name),
                message: problem.to_string(),
            });
        }
        debug!(name = %record.name, "volume checked");
    }

    info!(
        checked = volumes_checked,
        errors = errors.len(),
        "check finished"
    );
    Ok(CheckResult {
        volumes_checked,
        volumes_skipped,
        errors,
    })
}
