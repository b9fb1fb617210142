use std::path::Path;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use stowage_core::commands::repair::{self, DatabaseRecreator, LogLevel, RepairRequest, RepairResult};
use stowage_core::config::StowageConfig;
use stowage_core::filter::{FilesetFilter, PathFilter};
use stowage_types::error::{Result, StowageError};

pub(crate) struct RepairArgs<'a> {
    pub dry_run: bool,
    pub versions: Vec<usize>,
    pub time: Option<&'a str>,
    pub filters: &'a [String],
    pub allow_passphrase_change: bool,
}

/// This build cannot rebuild a database from the remote volumes alone.
struct RecreateUnsupported;

impl DatabaseRecreator for RecreateUnsupported {
    fn recreate(
        &self,
        _config: &StowageConfig,
        db_path: &Path,
        _filter: &PathFilter,
        _filesets: &FilesetFilter,
        _result: &mut RepairResult,
    ) -> Result<()> {
        Err(StowageError::User(format!(
            "no usable local database at {}; recreating it from the remote volumes is not \
             supported, restore the database file from a copy",
            db_path.display()
        )))
    }
}

pub(crate) fn run_repair(
    config: &StowageConfig,
    args: RepairArgs<'_>,
    shutdown: &AtomicBool,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let time = args
        .time
        .map(|t| {
            DateTime::parse_from_rfc3339(t)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| format!("invalid --time '{t}': {e}"))
        })
        .transpose()?;

    let request = RepairRequest {
        dry_run: args.dry_run,
        allow_passphrase_change: args.allow_passphrase_change,
        filter: PathFilter::new(args.filters)?,
        filesets: FilesetFilter::new(time, args.versions)?,
    };

    let result = repair::run(config, &request, &RecreateUnsupported, Some(shutdown))?;

    // Warnings and errors already went out through tracing.
    for entry in &result.entries {
        match entry.level {
            LogLevel::Message => println!("{}", entry.message),
            LogLevel::DryRun => println!("[dry-run] {}", entry.message),
            LogLevel::Warning | LogLevel::Error => {}
        }
    }

    let warnings = result.entries_at(LogLevel::Warning).count();
    let errors = result.entries_at(LogLevel::Error).count();
    let elapsed = result
        .end_time
        .map(|end| (end - result.begin_time).num_milliseconds() as f64 / 1000.0)
        .unwrap_or_default();
    println!(
        "Repair {}: {warnings} warnings, {errors} errors, {elapsed:.1}s",
        if result.interrupted { "interrupted" } else { "complete" },
    );

    if result.interrupted {
        return Err("repair was interrupted; run it again to finish".into());
    }
    if errors > 0 {
        return Err(format!("repair finished with {errors} error(s)").into());
    }
    Ok(())
}
