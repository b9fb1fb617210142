use std::collections::{BTreeSet, HashMap, HashSet};

use stowage_storage::ObjectInfo;

use crate::db::{LocalDatabase, RemoteVolumeRecord, VolumeState};
use crate::error::{Result, StowageError};
use crate::volume::{parse_volume_name, VolumeKind};

/// A remote object whose name parsed with this backup's prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedVolume {
    pub name: String,
    pub size: u64,
    pub kind: VolumeKind,
}

/// Diff between the remote listing and the database.
///
/// Every listed name lands in exactly one of: conforming (not kept),
/// `extra_volumes`, `verification_required_volumes` or `other_volumes`.
/// Database records absent remotely land in `missing_volumes` or
/// `stale_volumes`.
#[derive(Debug, Default)]
pub struct ReconciliationPlan {
    /// Present remotely, not usable as recorded. In listing order.
    pub extra_volumes: Vec<ListedVolume>,
    /// Expected remotely, absent. Blocks first, then Index, then Files.
    pub missing_volumes: Vec<RemoteVolumeRecord>,
    /// Present, but size or hash cannot be trusted without a download.
    pub verification_required_volumes: Vec<RemoteVolumeRecord>,
    /// Every listed name that parsed with our prefix.
    pub parsed_volumes: Vec<ListedVolume>,
    /// Unparseable names and names with a foreign prefix.
    pub other_volumes: Vec<ObjectInfo>,
    /// Foreign prefixes seen, sorted.
    pub backup_prefixes: Vec<String>,
    /// Recorded as Temporary or Deleting and gone remotely.
    pub stale_volumes: Vec<RemoteVolumeRecord>,
}

impl ReconciliationPlan {
    /// Items the progress counter covers.
    pub fn work_count(&self) -> usize {
        self.extra_volumes.len()
            + self.missing_volumes.len()
            + self.verification_required_volumes.len()
    }

    pub fn is_synchronized(&self) -> bool {
        self.work_count() == 0 && self.stale_volumes.is_empty()
    }
}

fn kind_order(kind: VolumeKind) -> u8 {
    match kind {
        VolumeKind::Blocks => 0,
        VolumeKind::Index => 1,
        VolumeKind::Files => 2,
    }
}

pub fn analyze(listing: &[ObjectInfo], db: &LocalDatabase, prefix: &str) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();
    let mut foreign = BTreeSet::new();
    let mut seen = HashSet::new();

    // Newest record per name.
    let mut records: HashMap<&str, &RemoteVolumeRecord> = HashMap::new();
    for rec in db.remote_volumes() {
        records.insert(rec.name.as_str(), rec);
    }

    for obj in listing {
        let parsed = match parse_volume_name(&obj.name) {
            Some(p) if p.prefix == prefix => p,
            Some(p) => {
                foreign.insert(p.prefix);
                plan.other_volumes.push(obj.clone());
                continue;
            }
            None => {
                plan.other_volumes.push(obj.clone());
                continue;
            }
        };
        let listed = ListedVolume {
            name: obj.name.clone(),
            size: obj.size,
            kind: parsed.kind,
        };
        plan.parsed_volumes.push(listed.clone());
        seen.insert(obj.name.as_str());

        let Some(rec) = records.get(obj.name.as_str()) else {
            plan.extra_volumes.push(listed);
            continue;
        };
        let size_ok = rec.size == Some(obj.size);
        match rec.state {
            VolumeState::Temporary | VolumeState::Deleting | VolumeState::Deleted => {
                plan.extra_volumes.push(listed)
            }
            VolumeState::Uploading => plan.verification_required_volumes.push((*rec).clone()),
            VolumeState::Uploaded if size_ok && rec.hash.is_some() => {}
            VolumeState::Uploaded => plan.verification_required_volumes.push((*rec).clone()),
            VolumeState::Verified if size_ok => {}
            VolumeState::Verified => plan.verification_required_volumes.push((*rec).clone()),
        }
    }

    let mut absent: Vec<&RemoteVolumeRecord> = records
        .values()
        .copied()
        .filter(|r| !seen.contains(r.name.as_str()))
        .collect();
    absent.sort_by_key(|r| (kind_order(r.kind), r.id));
    for rec in absent {
        match rec.state {
            VolumeState::Uploading | VolumeState::Uploaded | VolumeState::Verified => {
                plan.missing_volumes.push(rec.clone())
            }
            VolumeState::Temporary | VolumeState::Deleting => plan.stale_volumes.push(rec.clone()),
            VolumeState::Deleted => {}
        }
    }

    plan.backup_prefixes = foreign.into_iter().collect();
    plan
}

/// Refuse listings that point at a configuration mistake rather than at
/// damage: only foreign prefixes, or only volumes the database never knew.
pub fn preflight(plan: &ReconciliationPlan, prefix: &str) -> Result<()> {
    if plan.parsed_volumes.is_empty() && !plan.backup_prefixes.is_empty() {
        let msg = if plan.backup_prefixes.len() == 1 {
            format!(
                "Found no backup files with prefix {prefix}, but files with prefix {}, \
                 did you forget to set the backup prefix?",
                plan.backup_prefixes[0]
            )
        } else {
            format!(
                "Found no backup files with prefix {prefix}, but files with prefixes {}, \
                 did you forget to set the backup prefix?",
                plan.backup_prefixes.join(", ")
            )
        };
        return Err(StowageError::User(msg));
    }

    if plan.missing_volumes.is_empty()
        && plan.verification_required_volumes.is_empty()
        && !plan.extra_volumes.is_empty()
        && plan.extra_volumes.len() == plan.parsed_volumes.len()
    {
        return Err(StowageError::User(format!(
            "No files were missing, but {} remote files were found, \
             did you mean to recreate the database?",
            plan.extra_volumes.len()
        )));
    }
    Ok(())
}
