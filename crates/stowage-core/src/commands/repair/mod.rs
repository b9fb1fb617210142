//! `stowage repair`: bring the local database and the remote volumes back
//! into agreement.
//!
//! Routing: no database (or an empty or unreadable one) goes to database
//! recreation. Otherwise the database fixups run first, then the remote
//! reconciliation: plan, verify, accept or delete extras, rebuild missing.

mod accept;
mod cleanup;
pub mod fetch;
pub mod plan;
mod rebuild;
pub mod result;
mod verify;

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stowage_storage::ObjectStore;
use tracing::{debug, info, warn};

use crate::backend::RemoteVolumes;
use crate::config::{expand_tilde, StowageConfig};
use crate::db::LocalDatabase;
use crate::error::{Result, StowageError};
use crate::filter::{FilesetFilter, PathFilter};
use crate::options::EngineOptions;
use crate::storage;

pub use fetch::PrefetchDownloads;
pub use plan::{ListedVolume, ReconciliationPlan};
pub use result::{LogEntry, LogLevel, RecreateOutcome, RepairResult};

const MAX_BACKUP_SUFFIX: u32 = 1000;

/// What the operator asked for.
#[derive(Debug, Clone, Default)]
pub struct RepairRequest {
    pub dry_run: bool,
    pub allow_passphrase_change: bool,
    /// Paths a recreated database should include.
    pub filter: PathFilter,
    /// Filesets a recreated database should include.
    pub filesets: FilesetFilter,
}

/// Builds a database from the remote volumes alone.
pub trait DatabaseRecreator {
    /// Write a new database at `db_path`, restricted to `filter` and
    /// `filesets`. Progress and problems go to `result`.
    fn recreate(
        &self,
        config: &StowageConfig,
        db_path: &Path,
        filter: &PathFilter,
        filesets: &FilesetFilter,
        result: &mut RepairResult,
    ) -> Result<()>;
}

/// Per-item result inside a stage loop.
pub(crate) enum ItemOutcome {
    Completed,
    /// Failed for this item only; the caller records it and moves on.
    Recorded(StowageError),
    /// Must unwind the run.
    Abort(StowageError),
}

impl From<Result<()>> for ItemOutcome {
    fn from(r: Result<()>) -> Self {
        match r {
            Ok(()) => ItemOutcome::Completed,
            Err(e) if e.aborts_run() => ItemOutcome::Abort(e),
            Err(e) => ItemOutcome::Recorded(e),
        }
    }
}

/// State shared by the remote stages. Only the owning thread touches `db`.
pub(crate) struct RepairContext<'a> {
    pub db: LocalDatabase,
    pub backend: RemoteVolumes,
    pub options: EngineOptions,
    pub result: &'a mut RepairResult,
    pub dry_run: bool,
    /// Volumes whose content checked out during this run's verification.
    pub verified_this_run: HashSet<String>,
    /// Volumes that failed verification during this run.
    pub verify_failed: HashSet<String>,
    shutdown: Option<&'a AtomicBool>,
    target: usize,
    done: usize,
}

impl<'a> RepairContext<'a> {
    fn new(
        db: LocalDatabase,
        backend: RemoteVolumes,
        options: EngineOptions,
        result: &'a mut RepairResult,
        shutdown: Option<&'a AtomicBool>,
    ) -> Self {
        let dry_run = result.dry_run;
        Self {
            db,
            backend,
            options,
            result,
            dry_run,
            verified_this_run: HashSet::new(),
            verify_failed: HashSet::new(),
            shutdown,
            target: 0,
            done: 0,
        }
    }

    pub fn check_stop(&self) -> Result<()> {
        if self.shutdown.is_some_and(|f| f.load(Ordering::Relaxed)) {
            return Err(StowageError::Interrupted);
        }
        Ok(())
    }

    pub fn tick(&mut self) {
        self.done += 1;
        self.result.set_progress(self.done, self.target);
    }

    /// Persist the database. A dry run never writes it.
    pub fn commit(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.db.save()
    }
}

/// Run `stowage repair`.
pub fn run(
    config: &StowageConfig,
    request: &RepairRequest,
    recreator: &dyn DatabaseRecreator,
    shutdown: Option<&AtomicBool>,
) -> Result<RepairResult> {
    let store = storage::backend_from_config(&config.repository)?;
    run_with_backend(config, request, store, recreator, shutdown)
}

/// Like [`run`], against an already constructed store.
pub fn run_with_backend(
    config: &StowageConfig,
    request: &RepairRequest,
    store: Arc<dyn ObjectStore>,
    recreator: &dyn DatabaseRecreator,
    shutdown: Option<&AtomicBool>,
) -> Result<RepairResult> {
    if request.allow_passphrase_change {
        return Err(StowageError::PassphraseChangeUnsupported);
    }

    let mut result = RepairResult::new(request.dry_run);
    let db_path = PathBuf::from(expand_tilde(&config.database.path));

    if !LocalDatabase::exists(&db_path) {
        run_repair_local(config, request, recreator, &db_path, &mut result)?;
        result.finish();
        return Ok(result);
    }

    let db = match LocalDatabase::open(&db_path) {
        Ok(db) if db.remote_volume_count() > 0 => Some(db),
        Ok(_) => None,
        Err(e) => {
            result.add_warning(format!(
                "Failed to read local db {}, error: {e}",
                db_path.display()
            ));
            None
        }
    };

    let Some(mut db) = db else {
        if request.dry_run {
            result.add_dry_run_message("Performing dryrun recreate");
        } else {
            let backup = backup_path_for(&db_path)?;
            result.add_message(format!(
                "Renaming existing db from {} to {}",
                db_path.display(),
                backup.display()
            ));
            std::fs::rename(&db_path, &backup)?;
            result.recreated = Some(RecreateOutcome {
                database: db_path.clone(),
                previous: Some(backup),
            });
        }
        run_repair_local(config, request, recreator, &db_path, &mut result)?;
        result.finish();
        return Ok(result);
    };

    let options = EngineOptions::resolve(config, &mut db)?;
    run_repair_common(&mut db, &options, &mut result)?;
    if !request.dry_run {
        db.save()?;
    }

    let backend = RemoteVolumes::new(store, options.hasher.clone(), options.max_in_flight_uploads);
    let mut ctx = RepairContext::new(db, backend, options, &mut result, shutdown);
    run_repair_remote(&mut ctx)?;
    result.finish();
    Ok(result)
}

/// Recreate the database from the remote volumes, then run the fixups on
/// it. A dry run recreates into a throw-away directory.
pub fn run_repair_local(
    config: &StowageConfig,
    request: &RepairRequest,
    recreator: &dyn DatabaseRecreator,
    db_path: &Path,
    result: &mut RepairResult,
) -> Result<()> {
    if request.dry_run {
        let scratch = tempfile::Builder::new().prefix("stowage-dryrun-").tempdir()?;
        let scratch_db = scratch.path().join("recreate.db");
        debug!(path = %scratch_db.display(), "dry-run recreate into scratch database");
        return recreator.recreate(config, &scratch_db, &request.filter, &request.filesets, result);
    }

    info!(path = %db_path.display(), "recreating database");
    recreator.recreate(config, db_path, &request.filter, &request.filesets, result)?;

    let mut db = LocalDatabase::open(db_path)?;
    let options = EngineOptions::resolve(config, &mut db)?;
    run_repair_common(&mut db, &options, result)?;
    db.save()?;

    let previous = result.recreated.take().and_then(|r| r.previous);
    result.recreated = Some(RecreateOutcome {
        database: db_path.to_path_buf(),
        previous,
    });
    Ok(())
}

/// Database-only fixups. Safe on any database; each one is idempotent.
pub fn run_repair_common(
    db: &mut LocalDatabase,
    options: &EngineOptions,
    result: &mut RepairResult,
) -> Result<()> {
    if db.repair_in_progress() || db.partially_recreated() {
        result.add_warning("The database is marked as \"in-progress\" and may be incomplete.");
    }

    let metahash = db.fix_duplicate_metahash();
    let entries = db.fix_duplicate_file_entries();
    let blocklists = db.fix_duplicate_blocklist_hashes(&options.hasher, options.block_size);
    let recomputed = db.fix_missing_blocklist_hashes(&options.hasher, options.block_size);
    debug!(metahash, entries, blocklists, recomputed, "database fixups done");
    Ok(())
}

/// Reconcile the remote volumes with the database.
///
/// On interruption, in-flight uploads are awaited, the database is saved and
/// the result is returned marked `interrupted`.
pub(crate) fn run_repair_remote(ctx: &mut RepairContext<'_>) -> Result<()> {
    if ctx.db.partially_recreated() {
        return Err(StowageError::DataLossGuard(
            "The database was only partially recreated. This database may be incomplete \
             and the repair process is not allowed to alter remote files as that could \
             result in data loss."
                .into(),
        ));
    }
    if ctx.db.repair_in_progress() {
        return Err(StowageError::DataLossGuard(
            "The database was attempted repaired, but the repair did not complete. This \
             database may be incomplete and the repair process is not allowed to alter \
             remote files as that could result in data loss."
                .into(),
        ));
    }

    let listing = ctx.backend.list()?;
    let plan = plan::analyze(&listing, &ctx.db, &ctx.options.prefix);
    if ctx.dry_run {
        plan::preflight(&plan, &ctx.options.prefix)?;
    }

    if plan.is_synchronized() {
        ctx.result
            .add_message("Destination and database are synchronized, not making any changes");
        return Ok(());
    }
    ctx.target = plan.work_count();
    ctx.result.set_progress(0, ctx.target);
    debug!(
        extra = plan.extra_volumes.len(),
        missing = plan.missing_volumes.len(),
        verify = plan.verification_required_volumes.len(),
        stale = plan.stale_volumes.len(),
        "reconciliation plan"
    );

    let staged = run_stages(ctx, &plan);

    let drained = ctx.backend.wait_for_complete(&mut ctx.db);
    ctx.commit()?;

    match staged {
        Err(StowageError::Interrupted) => {
            warn!("repair interrupted");
            ctx.result.add_warning("Repair was interrupted before it completed");
            ctx.result.interrupted = true;
            drained
        }
        Err(e) => {
            if let Err(upload) = drained {
                ctx.result
                    .add_error(format!("Failed to complete pending uploads: {upload}"));
            }
            Err(e)
        }
        Ok(()) => drained,
    }
}

fn run_stages(ctx: &mut RepairContext<'_>, plan: &ReconciliationPlan) -> Result<()> {
    verify::verify_volumes(ctx, plan)?;
    cleanup::cleanup_extras(ctx, plan)?;
    rebuild::rebuild_missing(ctx, plan)
}

/// `<db>.backup`, or `<db>.backup-N` for the first free `N`.
fn backup_path_for(db_path: &Path) -> Result<PathBuf> {
    let with_suffix = |suffix: &str| {
        let mut name = OsString::from(db_path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    };

    let first = with_suffix(".backup");
    if !first.exists() {
        return Ok(first);
    }
    for n in 1..=MAX_BACKUP_SUFFIX {
        let candidate = with_suffix(&format!(".backup-{n}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(StowageError::User(format!(
        "no free backup name for {} (tried up to .backup-{MAX_BACKUP_SUFFIX})",
        db_path.display()
    )))
}
