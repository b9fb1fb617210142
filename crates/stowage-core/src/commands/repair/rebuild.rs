use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info};

use super::fetch::PrefetchDownloads;
use super::plan::ReconciliationPlan;
use super::{ItemOutcome, RepairContext};
use crate::blocklist;
use crate::config::IndexFilePolicy;
use crate::db::{BlockRecoveryList, RecoveryBlock, RemoteVolumeRecord, VolumeState};
use crate::error::{Result, StowageError};
use crate::volume::blocks::{BlockVolumeReader, BlockVolumeWriter};
use crate::volume::index::IndexVolumeWriter;
use crate::volume::{format_size, VolumeKind, VolumeUpload};

/// Rebuild and re-upload every missing volume under its original name.
pub(super) fn rebuild_missing(ctx: &mut RepairContext<'_>, plan: &ReconciliationPlan) -> Result<()> {
    let missing: HashSet<&str> = plan
        .missing_volumes
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    for record in &plan.missing_volumes {
        ctx.check_stop()?;
        ctx.tick();
        let rebuilt = match record.kind {
            VolumeKind::Files => rebuild_files(ctx, record),
            VolumeKind::Index => rebuild_index(ctx, record),
            VolumeKind::Blocks => match rebuild_blocks(ctx, record) {
                Ok(true) => refresh_linked_indexes(ctx, record, &missing),
                other => other.map(|_| ()),
            },
        };
        match ItemOutcome::from(rebuilt) {
            ItemOutcome::Completed => {}
            ItemOutcome::Recorded(e) => ctx.result.add_error(format!(
                "Failed to perform cleanup for missing file: {}, message: {e}",
                record.name
            )),
            ItemOutcome::Abort(e) => return Err(e),
        }
    }
    Ok(())
}

fn rebuild_files(ctx: &mut RepairContext<'_>, record: &RemoteVolumeRecord) -> Result<()> {
    let fileset = ctx.db.fileset_for_volume(record.id).ok_or_else(|| {
        StowageError::Other(format!("no fileset is recorded for {}", record.name))
    })?;
    let manifest = ctx.db.fileset_manifest(fileset.id)?;
    upload_rebuilt(ctx, record, manifest.to_bytes()?)
}

fn rebuild_index(ctx: &mut RepairContext<'_>, record: &RemoteVolumeRecord) -> Result<()> {
    let block_volumes: Vec<RemoteVolumeRecord> = ctx
        .db
        .block_volumes_for_index(record.id)
        .into_iter()
        .cloned()
        .collect();
    if block_volumes.is_empty() {
        return Err(StowageError::Other(format!(
            "no blocks volumes are linked to {}",
            record.name
        )));
    }

    let per = ctx.options.hashes_per_blocklist();
    let mut writer = IndexVolumeWriter::new();
    for volume in &block_volumes {
        let (Some(hash), Some(size)) = (volume.hash.clone(), volume.size) else {
            return Err(StowageError::Other(format!(
                "blocks volume {} has no recorded size and hash",
                volume.name
            )));
        };
        writer.start_volume(&volume.name);
        for (block, block_size) in ctx.db.blocks_in_volume(volume.id) {
            writer.add_block(block, block_size)?;
        }
        writer.finish_volume(hash, size)?;

        if ctx.options.index_policy == IndexFilePolicy::Full {
            for (hash, data) in ctx.db.blocklists_for_volume(volume.id, per) {
                blocklist::verify_blocklist(&hash, &data, &ctx.options.hasher)?;
                writer.write_blocklist(hash, data);
            }
        }
    }
    upload_rebuilt(ctx, record, writer.finish()?)
}

/// Returns `false` when blocks are missing and the run is a dry run, which
/// only reports them.
fn rebuild_blocks(ctx: &mut RepairContext<'_>, record: &RemoteVolumeRecord) -> Result<bool> {
    let mut list = ctx
        .db
        .block_recovery_list(record.id, ctx.options.block_size);
    let mut writer = BlockVolumeWriter::new(ctx.options.compression);

    recover_from_local_files(ctx, &mut list, &mut writer)?;
    recover_blocklists(ctx, &mut list, &mut writer)?;
    if list.missing_count() > 0 {
        recover_from_remote(ctx, &mut list, &mut writer)?;
    }

    if list.missing_count() > 0 {
        let missing = list.missing_hashes();
        let err = StowageError::MissingBlocks {
            count: missing.len(),
            volume: record.name.clone(),
            filesets: ctx.db.filesets_using_blocks(&missing),
        };
        if ctx.dry_run {
            ctx.result.add_error(err.to_string());
            return Ok(false);
        }
        return Err(err);
    }

    info!(
        name = %record.name,
        blocks = writer.block_count(),
        "all blocks recovered"
    );
    let data = writer.finish()?;
    if !ctx.dry_run {
        let dropped = ctx.db.remove_duplicate_blocks(record.id);
        if dropped > 0 {
            debug!(name = %record.name, dropped, "dropped duplicate block records");
        }
    }
    upload_rebuilt(ctx, record, data)?;
    Ok(true)
}

/// The rebuilt blocks volume has a new hash, so the index volumes that
/// describe it are regenerated too. Missing ones are rebuilt in their turn.
/// A failure is recorded against the index volume, not the blocks volume.
fn refresh_linked_indexes(
    ctx: &mut RepairContext<'_>,
    blocks: &RemoteVolumeRecord,
    missing: &HashSet<&str>,
) -> Result<()> {
    let indexes: Vec<RemoteVolumeRecord> = ctx
        .db
        .index_volumes_for_block(blocks.id)
        .into_iter()
        .filter(|r| r.state.is_live() && !missing.contains(r.name.as_str()))
        .cloned()
        .collect();
    for index in &indexes {
        match ItemOutcome::from(rebuild_index(ctx, index)) {
            ItemOutcome::Completed => {}
            ItemOutcome::Recorded(e) => ctx.result.add_error(format!(
                "Failed to refresh index file: {} for rebuilt {}, message: {e}",
                index.name, blocks.name
            )),
            ItemOutcome::Abort(e) => return Err(e),
        }
    }
    Ok(())
}

fn recover_from_local_files(
    ctx: &mut RepairContext<'_>,
    list: &mut BlockRecoveryList,
    writer: &mut BlockVolumeWriter,
) -> Result<()> {
    let pending: Vec<RecoveryBlock> = list.missing().cloned().collect();
    for block in pending {
        ctx.check_stop()?;
        for source in &block.sources {
            let data = match read_range(&source.path, source.offset, block.size) {
                Ok(d) => d,
                Err(e) => {
                    ctx.result.add_warning(format!(
                        "Failed to access file: {}, message: {e}",
                        source.path.display()
                    ));
                    continue;
                }
            };
            if data.len() == block.size as usize && ctx.options.hasher.hash(&data) == block.hash {
                writer.add_block(&block.hash, &data)?;
                list.set_block_restored(&block.hash, block.size);
                break;
            }
        }
    }
    Ok(())
}

/// Blocklist blocks are concatenated hashes, so the database can produce
/// them without any file.
fn recover_blocklists(
    ctx: &mut RepairContext<'_>,
    list: &mut BlockRecoveryList,
    writer: &mut BlockVolumeWriter,
) -> Result<()> {
    let per = ctx.options.hashes_per_blocklist();
    for (hash, data) in ctx.db.blocklists_for_volume(list.volume_id(), per) {
        if !list.is_missing(&hash) || ctx.options.hasher.hash(&data) != hash {
            continue;
        }
        if list.expected_size(&hash) == Some(data.len() as u32) {
            writer.add_block(&hash, &data)?;
            list.set_block_restored(&hash, data.len() as u32);
        }
    }
    Ok(())
}

fn recover_from_remote(
    ctx: &mut RepairContext<'_>,
    list: &mut BlockRecoveryList,
    writer: &mut BlockVolumeWriter,
) -> Result<()> {
    let sources = ctx
        .db
        .missing_block_sources(list.volume_id(), &list.missing_hashes());
    if sources.is_empty() {
        return Ok(());
    }
    debug!(volumes = sources.len(), "fetching remote volumes for missing blocks");

    let fetcher = PrefetchDownloads::new(
        ctx.backend.store(),
        ctx.options.hasher.clone(),
        sources,
        ctx.options.fetch_concurrency,
    );
    for (name, fetched) in fetcher {
        ctx.check_stop()?;
        let downloaded = match fetched {
            Ok(d) => d,
            Err(e) => {
                ctx.result.add_warning(format!(
                    "Failed to access remote file: {name}, message: {e}"
                ));
                continue;
            }
        };
        let reader = match BlockVolumeReader::open(&downloaded.data) {
            Ok(r) => r,
            Err(e) => {
                ctx.result.add_warning(format!(
                    "Failed to read remote file: {name}, message: {e}"
                ));
                continue;
            }
        };
        for (entry, content) in reader.blocks() {
            if !list.is_missing(&entry.hash) {
                continue;
            }
            let Ok(data) = content else {
                continue;
            };
            if list.expected_size(&entry.hash) == Some(data.len() as u32)
                && ctx.options.hasher.hash(&data) == entry.hash
            {
                writer.add_block(&entry.hash, &data)?;
                list.set_block_restored(&entry.hash, data.len() as u32);
            }
        }
        if list.missing_count() == 0 {
            break;
        }
    }
    Ok(())
}

fn read_range(path: &Path, offset: u64, len: u32) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len as usize);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Record the new size and hash, mark the volume Uploading and hand it to
/// the background uploader. Dry run only reports the sizes.
fn upload_rebuilt(ctx: &mut RepairContext<'_>, record: &RemoteVolumeRecord, data: Vec<u8>) -> Result<()> {
    let (size, hash) = ctx.backend.describe(&data);
    let previous = record
        .size
        .map(format_size)
        .unwrap_or_else(|| "unknown".into());
    let what = match record.kind {
        VolumeKind::Files => "fileset",
        VolumeKind::Index => "index file",
        VolumeKind::Blocks => "block file",
    };

    if ctx.dry_run {
        ctx.result.add_dry_run_message(format!(
            "would re-upload {what} {}, with size {}, previous size {previous}",
            record.name,
            format_size(size)
        ));
        return Ok(());
    }

    ctx.result.add_message(format!(
        "Re-uploading {what} {}, with size {}, previous size {previous}",
        record.name,
        format_size(size)
    ));
    ctx.db
        .update_remote_volume(&record.name, VolumeState::Uploading, Some(size), Some(hash))?;
    ctx.commit()?;
    ctx.backend.put(
        &mut ctx.db,
        VolumeUpload {
            name: record.name.clone(),
            kind: record.kind,
            data,
        },
    )
}
