//! Tree synchronization engine
//!
//! Walks the source tree depth-first, one directory level at a time. Each
//! level lists both sides once, sorts by name and then handles, in order:
//! files (copy or skip), target-only files (pruned in mirror mode),
//! directories (created if absent, then recursed into) and target-only
//! directories (pruned in mirror mode).

use super::compare::ComparePolicy;
use crate::backend::{Backend, CopyContext};
use crate::copy::DEFAULT_CHUNK_SIZE;
use crate::rules::{AcceptAll, EntryFilter};
use crate::types::{
    ActionKind, ActionRecord, BackendError, CancelToken, DirectoryDescriptor, EventSink,
    FailureKind, FileDescriptor, SyncError, SyncReport,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Whether target-only entries are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Add and update target entries; never delete
    #[default]
    Update,

    /// Also delete target entries that are absent from the source
    Mirror,
}

/// Tuning for one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub direction: Direction,
    pub compare: ComparePolicy,
    pub chunk_size: usize,
    /// Record the actions a run would take without touching the target
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Update,
            compare: ComparePolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            dry_run: false,
        }
    }
}

/// Why a level stopped early
enum Halt {
    /// Authorization failure: skip the rest of this directory level
    Denied,
    /// Cancel token tripped: stop the whole run
    Cancelled,
    /// Precondition violation: abandon the run and report it
    Fatal(SyncError),
}

type Level = Result<(), Halt>;

/// Synchronizes one source directory into one target directory
pub struct SyncEngine<'a> {
    source: &'a dyn Backend,
    target: &'a dyn Backend,
    options: SyncOptions,
    filter: Box<dyn EntryFilter + 'a>,
    events: EventSink,
    cancel: CancelToken,
}

impl<'a> SyncEngine<'a> {
    pub fn new(source: &'a dyn Backend, target: &'a dyn Backend, options: SyncOptions) -> Self {
        Self {
            source,
            target,
            options,
            filter: Box::new(AcceptAll),
            events: EventSink::discard(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_filter(mut self, filter: impl EntryFilter + 'a) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Synchronize `source_path` into `target_path`.
    ///
    /// Per-entry failures are recorded in the report and emitted as events;
    /// the run continues past them. A cancelled run returns normally with
    /// `report.cancelled` set.
    ///
    /// # Errors
    /// `SourceMissing`/`TargetMissing` when a root directory does not exist,
    /// and any precondition violation raised by a backend.
    pub fn run(&self, source_path: &str, target_path: &str) -> Result<SyncReport, SyncError> {
        let src_root = self.source.resolve_directory(source_path);
        if !src_root.exists() {
            return Err(SyncError::SourceMissing {
                path: src_root.full_path().to_string(),
            });
        }
        let dst_root = self.target.resolve_directory(target_path);
        if !dst_root.exists() {
            return Err(SyncError::TargetMissing {
                path: dst_root.full_path().to_string(),
            });
        }

        info!(
            source = %src_root.full_path(),
            target = %dst_root.full_path(),
            direction = ?self.options.direction,
            dry_run = self.options.dry_run,
            "synchronizing"
        );

        let mut run = Run {
            engine: self,
            report: SyncReport::new(),
            ctx: CopyContext {
                chunk_size: self.options.chunk_size,
                cancel: self.cancel.clone(),
                events: self.events.clone(),
            },
        };

        match run.sync_dir(&src_root, &dst_root, true, "") {
            Ok(()) | Err(Halt::Denied) => {}
            Err(Halt::Cancelled) => {
                run.report.cancelled = true;
                info!("synchronization cancelled");
            }
            Err(Halt::Fatal(err)) => return Err(err),
        }

        let report = run.report;
        info!(
            copied = report.copied,
            created = report.created_dirs,
            deleted = report.deleted_files + report.deleted_dirs,
            skipped = report.skipped,
            errors = report.errors,
            "synchronization finished"
        );
        Ok(report)
    }
}

/// State of one run
struct Run<'e, 'a> {
    engine: &'e SyncEngine<'a>,
    report: SyncReport,
    ctx: CopyContext,
}

impl Run<'_, '_> {
    fn record(&mut self, record: ActionRecord) {
        debug!(
            action = record.kind.name(),
            path = %record.path,
            outcome = ?record.outcome,
            "action"
        );
        self.report.record(&record);
        self.engine.events.action(record);
    }

    fn check_cancel(&self) -> Level {
        if self.engine.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record a failed backend call and decide how far it unwinds
    fn fail(&mut self, kind: ActionKind, path: &str, error: BackendError) -> Level {
        match error {
            BackendError::Cancelled { .. } => {
                self.record(ActionRecord::cancelled(kind, path));
                Err(Halt::Cancelled)
            }
            BackendError::Precondition(_) => Err(Halt::Fatal(error.into())),
            BackendError::Authorization { .. } => {
                warn!(path = %path, "access denied, skipping the rest of this directory");
                self.record(ActionRecord::failed(
                    kind,
                    path,
                    error.kind(),
                    error.to_string(),
                ));
                Err(Halt::Denied)
            }
            BackendError::Transient { .. } => {
                self.record(ActionRecord::failed(
                    kind,
                    path,
                    error.kind(),
                    error.to_string(),
                ));
                Ok(())
            }
        }
    }

    /// Record an operation that reported "not done" without an error
    fn not_done(&mut self, kind: ActionKind, path: &str, message: &str) {
        self.record(ActionRecord::failed(
            kind,
            path,
            FailureKind::NotFound,
            message,
        ));
    }

    fn sync_dir(
        &mut self,
        src_dir: &DirectoryDescriptor,
        dst_dir: &DirectoryDescriptor,
        dst_present: bool,
        relative: &str,
    ) -> Level {
        match self.sync_level(src_dir, dst_dir, dst_present, relative) {
            Err(Halt::Denied) => Ok(()),
            other => other,
        }
    }

    fn sync_level(
        &mut self,
        src_dir: &DirectoryDescriptor,
        dst_dir: &DirectoryDescriptor,
        dst_present: bool,
        relative: &str,
    ) -> Level {
        self.check_cancel()?;
        let engine = self.engine;
        let mirror = engine.options.direction == Direction::Mirror;

        // A source listing failure means the branch vanished or is unreadable.
        let (src_files, src_dirs) = match list_level(engine.source, src_dir) {
            Ok(listing) => listing,
            Err(e) => return self.branch_error(src_dir.full_path(), e),
        };
        let (dst_files, dst_dirs) = if dst_present {
            match list_level(engine.target, dst_dir) {
                Ok(listing) => listing,
                Err(e) => return self.branch_error(dst_dir.full_path(), e),
            }
        } else {
            (BTreeMap::new(), BTreeMap::new())
        };

        // Files
        for (name, src_file) in &src_files {
            let rel = child_relative(relative, name);
            if !engine.filter.accepts(&rel, false) {
                continue;
            }
            self.check_cancel()?;
            self.sync_file(src_file, dst_files.get(name), dst_dir)?;
        }

        // Target-only files
        if mirror {
            for (name, dst_file) in &dst_files {
                if src_files.contains_key(name)
                    || !engine.filter.accepts(&child_relative(relative, name), false)
                {
                    continue;
                }
                self.check_cancel()?;
                self.delete_file(dst_file, dst_dir)?;
            }
        }

        // Directories
        for (name, src_child) in &src_dirs {
            let rel = child_relative(relative, name);
            if !engine.filter.accepts(&rel, true) {
                continue;
            }
            self.check_cancel()?;

            let (dst_child, present) = match dst_dirs.get(name) {
                Some(existing) => (existing.clone(), true),
                None => match self.create_directory(src_child, dst_dir, dst_present)? {
                    Some(created) => created,
                    None => continue,
                },
            };
            self.sync_dir(src_child, &dst_child, present, &rel)?;
        }

        // Target-only directories
        if mirror {
            for (name, dst_child) in &dst_dirs {
                if src_dirs.contains_key(name)
                    || !engine.filter.accepts(&child_relative(relative, name), true)
                {
                    continue;
                }
                self.check_cancel()?;
                self.delete_directory(dst_child, dst_dir)?;
            }
        }

        Ok(())
    }

    /// A listing failed: record it and abandon this branch
    fn branch_error(&mut self, path: &str, error: BackendError) -> Level {
        match error {
            BackendError::Cancelled { .. } => Err(Halt::Cancelled),
            BackendError::Precondition(_) => Err(Halt::Fatal(error.into())),
            _ => {
                warn!(path = %path, error = %error, "cannot list directory, skipping branch");
                self.record(ActionRecord::failed(
                    ActionKind::Error,
                    path,
                    error.kind(),
                    error.to_string(),
                ));
                Ok(())
            }
        }
    }

    fn sync_file(
        &mut self,
        src: &FileDescriptor,
        dst: Option<&FileDescriptor>,
        dst_dir: &DirectoryDescriptor,
    ) -> Level {
        let engine = self.engine;
        let target_path = child_path(engine.target, dst_dir.full_path(), src.name());
        let missing;
        let dst = match dst {
            Some(existing) => existing,
            None => {
                missing =
                    FileDescriptor::missing(src.name(), target_path.as_str(), dst_dir.full_path());
                &missing
            }
        };

        let needs_copy = match engine
            .options
            .compare
            .needs_copy(engine.source, src, engine.target, dst)
        {
            Ok(needs) => needs,
            Err(e) => return self.fail(ActionKind::Copy, &target_path, e),
        };
        if !needs_copy {
            self.record(ActionRecord::succeeded(ActionKind::Skip, target_path));
            return Ok(());
        }

        if engine.options.dry_run {
            self.record(
                ActionRecord::succeeded(ActionKind::Copy, target_path).with_bytes(src.size()),
            );
            return Ok(());
        }

        match engine
            .target
            .try_copy_file(engine.source, src, dst_dir, &self.ctx)
        {
            Ok(true) => {
                self.record(
                    ActionRecord::succeeded(ActionKind::Copy, target_path).with_bytes(src.size()),
                );
                Ok(())
            }
            Ok(false) => {
                self.not_done(
                    ActionKind::Copy,
                    &target_path,
                    "target directory missing or entry in the way",
                );
                Ok(())
            }
            Err(e) => self.fail(ActionKind::Copy, &target_path, e),
        }
    }

    fn delete_file(&mut self, file: &FileDescriptor, dst_dir: &DirectoryDescriptor) -> Level {
        let path = file.full_path();
        if self.engine.options.dry_run {
            self.record(ActionRecord::succeeded(ActionKind::DeleteFile, path));
            return Ok(());
        }
        match self.engine.target.try_delete_file(file) {
            Ok(true) => {
                self.record(ActionRecord::succeeded(ActionKind::DeleteFile, path));
                Ok(())
            }
            Ok(false) => {
                self.not_done(ActionKind::DeleteFile, path, "file already gone");
                Ok(())
            }
            Err(e) => self.fail_prune(ActionKind::DeleteFile, path, dst_dir, e),
        }
    }

    fn delete_directory(
        &mut self,
        dir: &DirectoryDescriptor,
        dst_dir: &DirectoryDescriptor,
    ) -> Level {
        let path = dir.full_path();
        if self.engine.options.dry_run {
            self.record(ActionRecord::succeeded(ActionKind::DeleteDirectory, path));
            return Ok(());
        }
        match self.engine.target.try_delete_directory(dir) {
            Ok(true) => {
                self.record(ActionRecord::succeeded(ActionKind::DeleteDirectory, path));
                Ok(())
            }
            Ok(false) => {
                self.not_done(ActionKind::DeleteDirectory, path, "directory already gone");
                Ok(())
            }
            Err(e) => self.fail_prune(ActionKind::DeleteDirectory, path, dst_dir, e),
        }
    }

    /// A failed prune halts the level only when `dst_dir` itself is locked;
    /// a denial inside the pruned entry's own subtree leaves its siblings alone.
    fn fail_prune(
        &mut self,
        kind: ActionKind,
        path: &str,
        dst_dir: &DirectoryDescriptor,
        error: BackendError,
    ) -> Level {
        let target = self.engine.target;
        let inside_entry = match &error {
            BackendError::Authorization { path: denied } => {
                target.normalize(denied) != target.normalize(dst_dir.full_path())
            }
            _ => false,
        };
        if !inside_entry {
            return self.fail(kind, path, error);
        }
        warn!(path = %path, "access denied, leaving this entry in place");
        self.record(ActionRecord::failed(
            kind,
            path,
            error.kind(),
            error.to_string(),
        ));
        Ok(())
    }

    /// Create the target counterpart of `src_child`; `None` skips its subtree
    fn create_directory(
        &mut self,
        src_child: &DirectoryDescriptor,
        dst_parent: &DirectoryDescriptor,
        parent_present: bool,
    ) -> Result<Option<(DirectoryDescriptor, bool)>, Halt> {
        let engine = self.engine;
        let path = child_path(engine.target, dst_parent.full_path(), src_child.name());

        if engine.options.dry_run || !parent_present {
            self.record(ActionRecord::succeeded(ActionKind::CreateDirectory, path.as_str()));
            let planned = DirectoryDescriptor::new(
                src_child.name(),
                path,
                Some(dst_parent.full_path().to_string()),
                false,
            );
            return Ok(Some((planned, false)));
        }

        match engine.target.try_create_directory(src_child, dst_parent) {
            Ok(true) => {
                self.record(ActionRecord::succeeded(ActionKind::CreateDirectory, path.as_str()));
                Ok(Some((engine.target.resolve_directory(&path), true)))
            }
            Ok(false) => {
                self.not_done(
                    ActionKind::CreateDirectory,
                    &path,
                    "parent missing or entry in the way",
                );
                Ok(None)
            }
            Err(e) => {
                self.fail(ActionKind::CreateDirectory, &path, e)?;
                Ok(None)
            }
        }
    }
}

type Listing = (
    BTreeMap<String, FileDescriptor>,
    BTreeMap<String, DirectoryDescriptor>,
);

/// Files and directories of one level, keyed (and so sorted) by name
fn list_level(backend: &dyn Backend, dir: &DirectoryDescriptor) -> Result<Listing, BackendError> {
    let files = backend
        .list_files(dir)?
        .into_iter()
        .map(|f| (f.name().to_string(), f))
        .collect();
    let dirs = backend
        .list_directories(dir)?
        .into_iter()
        .map(|d| (d.name().to_string(), d))
        .collect();
    Ok((files, dirs))
}

fn child_relative(relative: &str, name: &str) -> String {
    if relative.is_empty() {
        name.to_string()
    } else {
        format!("{relative}/{name}")
    }
}

fn child_path(backend: &dyn Backend, dir: &str, name: &str) -> String {
    backend.normalize(&format!("{dir}/{name}"))
}
