use tracing::debug;

use super::plan::ListedVolume;
use super::RepairContext;
use crate::blocklist;
use crate::db::VolumeState;
use crate::error::{Result, StowageError};
use crate::volume::index::read_index_volume;
use crate::volume::VolumeKind;

/// Adopt an index volume the database does not know, if everything it
/// claims agrees with the database.
///
/// All checks complete before the database is touched, so a rejected
/// candidate leaves no trace. Under dry run an acceptable candidate is only
/// reported.
pub(super) fn try_accept(ctx: &mut RepairContext<'_>, listed: &ListedVolume) -> Result<()> {
    let downloaded = ctx.backend.get_with_info(&listed.name)?;
    let contents = read_index_volume(&downloaded.data)?;
    if contents.volumes.is_empty() {
        return Err(StowageError::Other(format!(
            "index file {} references no volumes",
            listed.name
        )));
    }

    let mut linked = Vec::with_capacity(contents.volumes.len());
    for v in &contents.volumes {
        let rec = ctx
            .db
            .volume_by_name(&v.name)
            .ok_or_else(|| StowageError::Other(format!("Unknown remote file {} detected", v.name)))?;
        if rec.kind != VolumeKind::Blocks {
            return Err(StowageError::Other(format!(
                "Volume {} is a {} volume, not a blocks volume",
                v.name, rec.kind
            )));
        }
        if ctx.verify_failed.contains(&v.name) {
            return Err(StowageError::Other(format!(
                "Volume {} failed verification in this run",
                v.name
            )));
        }
        let in_flight =
            rec.state == VolumeState::Uploading && ctx.backend.is_pending(&v.name);
        if !(rec.state.is_trusted() || in_flight || ctx.verified_this_run.contains(&v.name)) {
            return Err(StowageError::Other(format!(
                "Volume {} has local state {}",
                v.name, rec.state
            )));
        }
        if rec.hash.as_ref() != Some(&v.hash) || rec.size != Some(v.size) {
            return Err(StowageError::Other(format!(
                "Volume {} hash/size mismatch ({} - {}) vs ({} - {})",
                v.name,
                rec.hash.as_ref().map(|h| h.to_hex()).unwrap_or_default(),
                rec.size.unwrap_or_default(),
                v.hash.to_hex(),
                v.size
            )));
        }
        ctx.db.check_all_blocks_are_in_volume(rec.id, &v.blocks)?;
        linked.push(rec.id);
    }

    let per = ctx.options.hashes_per_blocklist();
    for bl in &contents.blocklists {
        blocklist::verify_blocklist(&bl.hash, &bl.data, &ctx.options.hasher)?;
        ctx.db.check_blocklist_correct(&bl.hash, &bl.data, per)?;
    }

    if ctx.dry_run {
        ctx.result
            .add_dry_run_message(format!("would accept new index file {}", listed.name));
        return Ok(());
    }

    ctx.result.add_message(format!("Accepting new index file {}", listed.name));
    let id = ctx
        .db
        .register_remote_volume(&listed.name, VolumeKind::Index, VolumeState::Uploading);
    for block_volume in linked {
        ctx.db.add_index_block_link(id, block_volume);
    }
    ctx.db.update_remote_volume(
        &listed.name,
        VolumeState::Verified,
        Some(downloaded.size),
        Some(downloaded.hash),
    )?;
    debug!(name = %listed.name, "index accepted");
    ctx.commit()
}
