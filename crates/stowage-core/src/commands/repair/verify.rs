use tracing::debug;

use super::plan::ReconciliationPlan;
use super::{ItemOutcome, RepairContext};
use crate::check::test_volume_internals;
use crate::db::{RemoteVolumeRecord, VolumeState};
use crate::error::{Result, StowageError};
use crate::volume::format_size;

/// Download every volume whose recorded size or hash cannot be trusted and
/// mark it Verified when its content checks out.
pub(super) fn verify_volumes(ctx: &mut RepairContext<'_>, plan: &ReconciliationPlan) -> Result<()> {
    for record in &plan.verification_required_volumes {
        ctx.check_stop()?;
        ctx.tick();
        match ItemOutcome::from(verify_one(ctx, record)) {
            ItemOutcome::Completed => {}
            ItemOutcome::Recorded(e) => {
                ctx.verify_failed.insert(record.name.clone());
                ctx.result.add_error(format!(
                    "Failed to perform verification for file: {}, please run check; message: {e}",
                    record.name
                ))
            }
            ItemOutcome::Abort(e) => return Err(e),
        }
    }
    Ok(())
}

fn verify_one(ctx: &mut RepairContext<'_>, record: &RemoteVolumeRecord) -> Result<()> {
    let downloaded = ctx.backend.get_with_info(&record.name)?;
    let problems = test_volume_internals(&ctx.db, record, &downloaded.data, &ctx.options);
    if !problems.is_empty() {
        let listed: Vec<String> = problems.iter().map(|p| p.to_string()).collect();
        return Err(StowageError::Other(format!(
            "{} problems found: {}",
            problems.len(),
            listed.join("; ")
        )));
    }

    ctx.verified_this_run.insert(record.name.clone());
    if ctx.dry_run {
        ctx.result.add_dry_run_message(format!(
            "would mark {} verified, with size {}",
            record.name,
            format_size(downloaded.size)
        ));
        return Ok(());
    }
    ctx.result.add_message(format!(
        "Successfully captured hash for {}, updating database",
        record.name
    ));
    debug!(name = %record.name, size = downloaded.size, "marking verified");
    ctx.db.update_remote_volume(
        &record.name,
        VolumeState::Verified,
        Some(downloaded.size),
        Some(downloaded.hash),
    )?;
    ctx.commit()
}
