use tracing::info;

use super::accept::try_accept;
use super::plan::{ListedVolume, ReconciliationPlan};
use super::{ItemOutcome, RepairContext};
use crate::config::IndexFilePolicy;
use crate::db::VolumeState;
use crate::error::Result;
use crate::volume::VolumeKind;

/// Give each extra index volume a chance to be accepted, delete the rest,
/// then retire stale records.
pub(super) fn cleanup_extras(ctx: &mut RepairContext<'_>, plan: &ReconciliationPlan) -> Result<()> {
    for listed in &plan.extra_volumes {
        ctx.check_stop()?;
        ctx.tick();

        if listed.kind == VolumeKind::Index && ctx.options.index_policy != IndexFilePolicy::None {
            match ItemOutcome::from(try_accept(ctx, listed)) {
                ItemOutcome::Completed => continue,
                ItemOutcome::Recorded(e) => ctx.result.add_error(format!(
                    "Failed to accept new index file: {}, message: {e}",
                    listed.name
                )),
                ItemOutcome::Abort(e) => return Err(e),
            }
        }

        match ItemOutcome::from(remove_volume(ctx, listed)) {
            ItemOutcome::Completed => {}
            ItemOutcome::Recorded(e) => ctx.result.add_error(format!(
                "Failed to perform cleanup for extra file: {}, message: {e}",
                listed.name
            )),
            ItemOutcome::Abort(e) => return Err(e),
        }
    }

    retire_stale(ctx, plan)
}

fn remove_volume(ctx: &mut RepairContext<'_>, listed: &ListedVolume) -> Result<()> {
    if ctx.dry_run {
        ctx.result
            .add_dry_run_message(format!("would delete file {}", listed.name));
        return Ok(());
    }
    ctx.db
        .register_remote_volume(&listed.name, listed.kind, VolumeState::Deleting);
    ctx.commit()?;
    ctx.backend.delete(&listed.name, listed.size)?;
    ctx.db
        .update_remote_volume(&listed.name, VolumeState::Deleted, None, None)?;
    ctx.commit()
}

fn retire_stale(ctx: &mut RepairContext<'_>, plan: &ReconciliationPlan) -> Result<()> {
    for record in &plan.stale_volumes {
        ctx.check_stop()?;
        if ctx.dry_run {
            ctx.result.add_dry_run_message(format!(
                "would mark {} ({}) as deleted",
                record.name, record.state
            ));
            continue;
        }
        info!(name = %record.name, state = %record.state, "marking absent volume deleted");
        ctx.db
            .update_remote_volume(&record.name, VolumeState::Deleted, None, None)?;
    }
    if !plan.stale_volumes.is_empty() {
        ctx.commit()?;
    }
    Ok(())
}
