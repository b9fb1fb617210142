use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Message,
    Warning,
    Error,
    /// What a non-dry run would have done.
    DryRun,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Message => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::DryRun => "dry-run",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Where a recreated database was written, and where the old one was moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecreateOutcome {
    pub database: PathBuf,
    pub previous: Option<PathBuf>,
}

/// Report of one repair run. Every entry is also emitted through `tracing`.
#[derive(Debug)]
pub struct RepairResult {
    pub dry_run: bool,
    /// Fraction of planned items processed, in `[0, 1]`.
    pub progress: f32,
    pub entries: Vec<LogEntry>,
    pub interrupted: bool,
    pub recreated: Option<RecreateOutcome>,
    pub begin_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RepairResult {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            progress: 0.0,
            entries: Vec::new(),
            interrupted: false,
            recreated: None,
            begin_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.push(LogLevel::Message, message);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.push(LogLevel::Warning, message);
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.push(LogLevel::Error, message);
    }

    pub fn add_dry_run_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("[dry-run] {message}");
        self.push(LogLevel::DryRun, message);
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.entries.push(LogEntry { level, message });
    }

    pub fn set_progress(&mut self, done: usize, target: usize) {
        self.progress = if target == 0 {
            1.0
        } else {
            (done.min(target) as f32) / (target as f32)
        };
    }

    pub fn entries_at(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level == level)
    }

    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries_at(LogLevel::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Stamp the end time. A run that was not interrupted is complete.
    pub fn finish(&mut self) {
        if !self.interrupted {
            self.progress = 1.0;
        }
        self.end_time = Some(Utc::now());
    }
}
