//! SyncReport - tallies of what one run did

use super::{ActionKind, ActionOutcome, ActionRecord};
use serde::Serialize;

/// Statistics about a synchronization run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Files copied or overwritten
    pub copied: usize,

    /// Directories created on the target
    pub created_dirs: usize,

    /// Target-only files removed
    pub deleted_files: usize,

    /// Target-only directories removed
    pub deleted_dirs: usize,

    /// Files left alone because they were unchanged
    pub skipped: usize,

    /// Failed actions (the run continued past them)
    pub errors: usize,

    /// Bytes written by successful copies
    pub bytes_copied: u64,

    /// Run stopped early through the cancel token
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the tallies from one action record
    pub fn record(&mut self, record: &ActionRecord) {
        match &record.outcome {
            ActionOutcome::Succeeded => match record.kind {
                ActionKind::Copy => {
                    self.copied += 1;
                    self.bytes_copied += record.bytes.unwrap_or(0);
                }
                ActionKind::CreateDirectory => self.created_dirs += 1,
                ActionKind::DeleteFile => self.deleted_files += 1,
                ActionKind::DeleteDirectory => self.deleted_dirs += 1,
                ActionKind::Skip => self.skipped += 1,
                ActionKind::Error => self.errors += 1,
            },
            ActionOutcome::Failed { .. } => self.errors += 1,
            ActionOutcome::Cancelled => self.cancelled = true,
        }
    }

    /// Number of mutating actions that took effect
    pub fn actions_performed(&self) -> usize {
        self.copied + self.created_dirs + self.deleted_files + self.deleted_dirs
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Fold another report (e.g. another directory pair) into this one
    pub fn merge(&mut self, other: &SyncReport) {
        self.copied += other.copied;
        self.created_dirs += other.created_dirs;
        self.deleted_files += other.deleted_files;
        self.deleted_dirs += other.deleted_dirs;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.bytes_copied += other.bytes_copied;
        self.cancelled |= other.cancelled;
    }
}
