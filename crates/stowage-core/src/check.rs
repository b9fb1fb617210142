//! Structural verification of a downloaded volume against the database.
//! Shared by the `check` command and the repair verification stage.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::blocklist;
use crate::db::{LocalDatabase, RemoteVolumeRecord};
use crate::options::EngineOptions;
use crate::volume::blocks::BlockVolumeReader;
use crate::volume::fileset::{FilesetEntry, FilesetManifest};
use crate::volume::index::read_index_volume;
use crate::volume::VolumeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestEntryStatus {
    /// Expected by the database, absent from the volume.
    Missing,
    /// Present in the volume, unknown to the database.
    Extra,
    /// Present on both sides with different content.
    Modified,
    /// The volume could not be read.
    Error,
}

impl fmt::Display for TestEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestEntryStatus::Missing => "missing",
            TestEntryStatus::Extra => "extra",
            TestEntryStatus::Modified => "modified",
            TestEntryStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeProblem {
    pub status: TestEntryStatus,
    pub item: String,
}

impl VolumeProblem {
    fn new(status: TestEntryStatus, item: impl Into<String>) -> Self {
        Self {
            status,
            item: item.into(),
        }
    }
}

impl fmt::Display for VolumeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.item)
    }
}

/// Check that `data` is a well-formed volume of `record.kind` whose content
/// agrees with the database. An empty result means the volume is sound.
pub fn test_volume_internals(
    db: &LocalDatabase,
    record: &RemoteVolumeRecord,
    data: &[u8],
    options: &EngineOptions,
) -> Vec<VolumeProblem> {
    match record.kind {
        VolumeKind::Blocks => test_blocks_volume(db, record, data, options),
        VolumeKind::Index => test_index_volume(db, record, data, options),
        VolumeKind::Files => test_files_volume(db, record, data),
    }
}

fn test_blocks_volume(
    db: &LocalDatabase,
    record: &RemoteVolumeRecord,
    data: &[u8],
    options: &EngineOptions,
) -> Vec<VolumeProblem> {
    let reader = match BlockVolumeReader::open(data) {
        Ok(r) => r,
        Err(e) => return vec![VolumeProblem::new(TestEntryStatus::Error, e.to_string())],
    };

    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    for (entry, content) in reader.blocks() {
        match content {
            Ok(bytes) => {
                if options.hasher.hash(&bytes) != entry.hash {
                    problems.push(VolumeProblem::new(
                        TestEntryStatus::Modified,
                        entry.hash.to_hex(),
                    ));
                }
            }
            Err(e) => problems.push(VolumeProblem::new(
                TestEntryStatus::Error,
                format!("block {}: {e}", entry.hash.to_hex()),
            )),
        }
        if !db.block_belongs_to(&entry.hash, record.id) {
            problems.push(VolumeProblem::new(TestEntryStatus::Extra, entry.hash.to_hex()));
        }
        seen.insert(entry.hash.clone());
    }

    for (hash, _) in db.blocks_in_volume(record.id) {
        if !seen.contains(&hash) {
            problems.push(VolumeProblem::new(TestEntryStatus::Missing, hash.to_hex()));
        }
    }
    problems
}

fn test_index_volume(
    db: &LocalDatabase,
    record: &RemoteVolumeRecord,
    data: &[u8],
    options: &EngineOptions,
) -> Vec<VolumeProblem> {
    let contents = match read_index_volume(data) {
        Ok(c) => c,
        Err(e) => return vec![VolumeProblem::new(TestEntryStatus::Error, e.to_string())],
    };

    let mut problems = Vec::new();
    let mut named = HashSet::new();
    for v in &contents.volumes {
        named.insert(v.name.as_str());
        let Some(rec) = db.volume_by_name(&v.name) else {
            problems.push(VolumeProblem::new(TestEntryStatus::Extra, v.name.clone()));
            continue;
        };
        if rec.hash.as_ref() != Some(&v.hash) || rec.size != Some(v.size) {
            problems.push(VolumeProblem::new(
                TestEntryStatus::Modified,
                format!("{} hash/size", v.name),
            ));
        }
        if let Err(e) = db.check_all_blocks_are_in_volume(rec.id, &v.blocks) {
            problems.push(VolumeProblem::new(TestEntryStatus::Modified, e.to_string()));
        }
    }
    for linked in db.block_volumes_for_index(record.id) {
        if !named.contains(linked.name.as_str()) {
            problems.push(VolumeProblem::new(TestEntryStatus::Missing, linked.name.clone()));
        }
    }

    let per = options.hashes_per_blocklist();
    for bl in &contents.blocklists {
        let verdict = blocklist::verify_blocklist(&bl.hash, &bl.data, &options.hasher)
            .and_then(|_| db.check_blocklist_correct(&bl.hash, &bl.data, per));
        if let Err(e) = verdict {
            problems.push(VolumeProblem::new(TestEntryStatus::Modified, e.to_string()));
        }
    }
    problems
}

fn test_files_volume(
    db: &LocalDatabase,
    record: &RemoteVolumeRecord,
    data: &[u8],
) -> Vec<VolumeProblem> {
    let actual = match FilesetManifest::from_bytes(data) {
        Ok(m) => m,
        Err(e) => return vec![VolumeProblem::new(TestEntryStatus::Error, e.to_string())],
    };
    let expected = match db.fileset_for_volume(record.id) {
        Some(fs) => match db.fileset_manifest(fs.id) {
            Ok(m) => m,
            Err(e) => return vec![VolumeProblem::new(TestEntryStatus::Error, e.to_string())],
        },
        None => {
            return vec![VolumeProblem::new(
                TestEntryStatus::Error,
                format!("no fileset recorded for {}", record.name),
            )]
        }
    };

    let index = |m: &FilesetManifest| -> BTreeMap<String, FilesetEntry> {
        m.entries
            .iter()
            .map(|e| (e.path.clone(), e.clone()))
            .collect()
    };
    let want = index(&expected);
    let have = index(&actual);

    let mut problems = Vec::new();
    for (path, entry) in &want {
        match have.get(path) {
            None => problems.push(VolumeProblem::new(TestEntryStatus::Missing, path.clone())),
            Some(found) if found != entry => {
                problems.push(VolumeProblem::new(TestEntryStatus::Modified, path.clone()))
            }
            Some(_) => {}
        }
    }
    for path in have.keys() {
        if !want.contains_key(path) {
            problems.push(VolumeProblem::new(TestEntryStatus::Extra, path.clone()));
        }
    }
    problems
}
