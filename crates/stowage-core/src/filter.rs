use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, StowageError};

/// Include-filter on file paths. An empty filter matches everything.
#[derive(Debug, Clone)]
pub struct PathFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PathFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let glob = Glob::new(pat)
                .map_err(|e| StowageError::User(format!("invalid filter pattern '{pat}': {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| StowageError::User(format!("invalid filter: {e}")))?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, path: &str) -> bool {
        self.is_empty() || self.set.is_match(path)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which filesets a recreate should consider.
///
/// `versions` index filesets newest-first (0 is the latest). `time` picks
/// the newest fileset taken at or before that instant. With neither set,
/// every fileset is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesetFilter {
    pub time: Option<DateTime<Utc>>,
    pub versions: Vec<usize>,
}

impl FilesetFilter {
    pub fn new(time: Option<DateTime<Utc>>, versions: Vec<usize>) -> Result<Self> {
        if time.is_some() && !versions.is_empty() {
            return Err(StowageError::User(
                "--time and --version cannot be combined".into(),
            ));
        }
        Ok(Self { time, versions })
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_none() && self.versions.is_empty()
    }

    /// Apply to fileset timestamps. Returns the selected timestamps in
    /// newest-first order.
    pub fn select(&self, timestamps: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
        let mut sorted = timestamps.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        if let Some(t) = self.time {
            return sorted.into_iter().find(|ts| *ts <= t).into_iter().collect();
        }
        if !self.versions.is_empty() {
            return sorted
                .into_iter()
                .enumerate()
                .filter(|(i, _)| self.versions.contains(i))
                .map(|(_, ts)| ts)
                .collect();
        }
        sorted
    }
}
