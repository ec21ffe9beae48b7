//! In-memory backend used by tests
//!
//! Entries live in a flat list guarded by a mutex. A directory can be
//! locked, which makes it and its direct children reject create, delete and
//! copy with an authorization failure. Copies are buffered and only
//! registered in the store once the transfer completed.

use super::path::{is_below, is_valid_name, join_slashed, normalize_slashed, split_slashed};
use super::{
    cancelled, check_copy_source, stream_into, Backend, BackendKind, BackendResult, CopyContext,
    ReadStream,
};
use crate::copy::CopyOutcome;
use crate::types::{BackendError, DirectoryDescriptor, EntryDetail, FileDescriptor};
use std::collections::HashSet;
use std::io::{self, Cursor, ErrorKind, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct VirtualEntry {
    path: String,
    is_directory: bool,
    locked: bool,
    modified: SystemTime,
    content: Arc<Vec<u8>>,
}

impl VirtualEntry {
    fn directory(path: String) -> Self {
        Self {
            path,
            is_directory: true,
            locked: false,
            modified: UNIX_EPOCH,
            content: Arc::new(Vec::new()),
        }
    }

    fn file(path: String, content: Vec<u8>, modified: SystemTime) -> Self {
        Self {
            path,
            is_directory: false,
            locked: false,
            modified,
            content: Arc::new(content),
        }
    }

    fn parent(&self) -> Option<String> {
        split_slashed(&self.path).0
    }
}

#[derive(Debug, Default)]
struct VirtualStore {
    entries: Vec<VirtualEntry>,
    /// Target file paths whose writes fail with a simulated network error
    failing_targets: HashSet<String>,
}

impl VirtualStore {
    fn find(&self, path: &str) -> Option<&VirtualEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut VirtualEntry> {
        self.entries.iter_mut().find(|e| e.path == path)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.find(path).is_some_and(|e| e.is_directory)
    }

    fn is_file(&self, path: &str) -> bool {
        self.find(path).is_some_and(|e| !e.is_directory)
    }

    fn is_locked(&self, dir: &str) -> bool {
        self.find(dir).is_some_and(|e| e.is_directory && e.locked)
    }

    /// Create `path` and any missing ancestors
    fn ensure_dir(&mut self, path: &str) {
        if self.is_dir(path) {
            return;
        }
        if let (Some(parent), _) = split_slashed(path) {
            self.ensure_dir(&parent);
        }
        self.entries.push(VirtualEntry::directory(path.to_string()));
    }

    fn children(&self, dir: &str) -> impl Iterator<Item = &VirtualEntry> {
        let dir = dir.to_string();
        self.entries
            .iter()
            .filter(move |e| e.parent().as_deref() == Some(dir.as_str()))
    }
}

/// In-memory filesystem with directory locks and fault injection
#[derive(Debug)]
pub struct VirtualBackend {
    store: Mutex<VirtualStore>,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBackend {
    /// Empty store holding only the root directory
    pub fn new() -> Self {
        let store = VirtualStore {
            entries: vec![VirtualEntry::directory("/".to_string())],
            failing_targets: HashSet::new(),
        };
        Self {
            store: Mutex::new(store),
        }
    }

    fn store(&self) -> MutexGuard<'_, VirtualStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a directory (and missing ancestors)
    pub fn add_directory(&self, path: &str) -> DirectoryDescriptor {
        let path = self.normalize(path);
        self.store().ensure_dir(&path);
        self.resolve_directory(&path)
    }

    /// Add or replace a file stamped with the current time
    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) -> FileDescriptor {
        self.add_file_with_time(path, content, SystemTime::now())
    }

    /// Add or replace a file with an explicit modification time
    pub fn add_file_with_time(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
        modified: SystemTime,
    ) -> FileDescriptor {
        let path = self.normalize(path);
        {
            let mut store = self.store();
            if let (Some(parent), _) = split_slashed(&path) {
                store.ensure_dir(&parent);
            }
            store.entries.retain(|e| e.path != path);
            store
                .entries
                .push(VirtualEntry::file(path.clone(), content.into(), modified));
        }
        self.resolve_file(&path)
    }

    /// Lock a directory; returns false if there is no such directory
    pub fn lock(&self, path: &str) -> bool {
        self.set_lock(path, true)
    }

    pub fn unlock(&self, path: &str) -> bool {
        self.set_lock(path, false)
    }

    fn set_lock(&self, path: &str, locked: bool) -> bool {
        let path = self.normalize(path);
        match self.store().find_mut(&path) {
            Some(entry) if entry.is_directory => {
                entry.locked = locked;
                true
            }
            _ => false,
        }
    }

    /// Make every copy that writes `target_file` fail mid-transfer
    pub fn fail_copies_to(&self, target_file: &str) {
        let path = self.normalize(target_file);
        self.store().failing_targets.insert(path);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.store().failing_targets.clear();
    }

    /// Contents of a file, if present
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let path = self.normalize(path);
        self.store()
            .find(&path)
            .filter(|e| !e.is_directory)
            .map(|e| e.content.as_ref().clone())
    }

    /// Sorted list of every path in the store
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.store().entries.iter().map(|e| e.path.clone()).collect();
        paths.sort();
        paths
    }

    fn file_descriptor(entry: &VirtualEntry) -> FileDescriptor {
        let (parent, name) = split_slashed(&entry.path);
        FileDescriptor::new(
            name,
            entry.path.clone(),
            parent.unwrap_or_default(),
            entry.content.len() as u64,
            entry.modified,
        )
        .with_detail(EntryDetail::Virtual {
            locked: entry.locked,
            is_directory: entry.is_directory,
        })
    }

    fn directory_descriptor(entry: &VirtualEntry) -> DirectoryDescriptor {
        let (parent, name) = split_slashed(&entry.path);
        DirectoryDescriptor::new(name, entry.path.clone(), parent, true)
            .locked(entry.locked)
            .with_detail(EntryDetail::Virtual {
                locked: entry.locked,
                is_directory: true,
            })
    }
}

/// Buffers a copy until it is committed to the store
struct PendingWrite {
    buffer: Vec<u8>,
    fail: bool,
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(
                ErrorKind::ConnectionReset,
                "simulated transfer failure",
            ));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Backend for VirtualBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Virtual
    }

    fn normalize(&self, path: &str) -> String {
        normalize_slashed(path, false)
    }

    fn resolve_file(&self, path: &str) -> FileDescriptor {
        let path = self.normalize(path);
        let store = self.store();
        match store.find(&path) {
            Some(entry) if !entry.is_directory => Self::file_descriptor(entry),
            _ => {
                let (parent, name) = split_slashed(&path);
                FileDescriptor::missing(name, path.clone(), parent.unwrap_or_default())
                    .with_detail(EntryDetail::Virtual {
                        locked: false,
                        is_directory: false,
                    })
            }
        }
    }

    fn resolve_directory(&self, path: &str) -> DirectoryDescriptor {
        let path = self.normalize(path);
        let store = self.store();
        match store.find(&path) {
            Some(entry) if entry.is_directory => Self::directory_descriptor(entry),
            _ => {
                let (parent, name) = split_slashed(&path);
                DirectoryDescriptor::new(name, path.clone(), parent, false).with_detail(
                    EntryDetail::Virtual {
                        locked: false,
                        is_directory: true,
                    },
                )
            }
        }
    }

    fn file_exists(&self, path: &str) -> bool {
        let path = self.normalize(path);
        self.store().is_file(&path)
    }

    fn directory_exists(&self, path: &str) -> bool {
        let path = self.normalize(path);
        self.store().is_dir(&path)
    }

    fn list_files(&self, dir: &DirectoryDescriptor) -> BackendResult<Vec<FileDescriptor>> {
        let store = self.store();
        if !store.is_dir(dir.full_path()) {
            return Err(BackendError::transient(
                dir.full_path(),
                io::Error::new(ErrorKind::NotFound, "directory vanished"),
            ));
        }
        Ok(store
            .children(dir.full_path())
            .filter(|e| !e.is_directory)
            .map(Self::file_descriptor)
            .collect())
    }

    fn list_directories(
        &self,
        dir: &DirectoryDescriptor,
    ) -> BackendResult<Vec<DirectoryDescriptor>> {
        let store = self.store();
        if !store.is_dir(dir.full_path()) {
            return Err(BackendError::transient(
                dir.full_path(),
                io::Error::new(ErrorKind::NotFound, "directory vanished"),
            ));
        }
        Ok(store
            .children(dir.full_path())
            .filter(|e| e.is_directory)
            .map(Self::directory_descriptor)
            .collect())
    }

    fn try_create_directory(
        &self,
        source_dir: &DirectoryDescriptor,
        target_parent: &DirectoryDescriptor,
    ) -> BackendResult<bool> {
        if !is_valid_name(source_dir.name()) {
            return Err(BackendError::Precondition(format!(
                "cannot create directory named {:?}",
                source_dir.name()
            )));
        }
        let parent = self.normalize(target_parent.full_path());
        let path = join_slashed(&parent, source_dir.name());

        let mut store = self.store();
        if !store.is_dir(&parent) {
            debug!(path = %path, "parent directory missing");
            return Ok(false);
        }
        if store.is_locked(&parent) {
            return Err(BackendError::denied(parent));
        }
        if store.is_dir(&path) {
            return Ok(true);
        }
        if store.is_file(&path) {
            warn!(path = %path, "a file is in the way of the new directory");
            return Ok(false);
        }
        store.entries.push(VirtualEntry::directory(path));
        Ok(true)
    }

    fn try_delete_file(&self, file: &FileDescriptor) -> BackendResult<bool> {
        let path = self.normalize(file.full_path());
        let mut store = self.store();
        if let (Some(parent), _) = split_slashed(&path) {
            if store.is_locked(&parent) {
                return Err(BackendError::denied(parent));
            }
        }
        if !store.is_file(&path) {
            return Ok(false);
        }
        store.entries.retain(|e| e.path != path);
        Ok(true)
    }

    fn try_delete_directory(&self, dir: &DirectoryDescriptor) -> BackendResult<bool> {
        let path = self.normalize(dir.full_path());
        if path == "/" {
            return Err(BackendError::Precondition(
                "refusing to delete the root directory".to_string(),
            ));
        }
        let mut store = self.store();
        if !store.is_dir(&path) {
            return Ok(false);
        }
        if let (Some(parent), _) = split_slashed(&path) {
            if store.is_locked(&parent) {
                return Err(BackendError::denied(parent));
            }
        }
        if let Some(locked) = store
            .entries
            .iter()
            .find(|e| e.is_directory && e.locked && (e.path == path || is_below(&e.path, &path)))
        {
            return Err(BackendError::denied(locked.path.clone()));
        }
        store
            .entries
            .retain(|e| e.path != path && !is_below(&e.path, &path));
        Ok(true)
    }

    fn try_copy_file(
        &self,
        source: &dyn Backend,
        file: &FileDescriptor,
        target_dir: &DirectoryDescriptor,
        ctx: &CopyContext,
    ) -> BackendResult<bool> {
        check_copy_source(file)?;
        let dir = self.normalize(target_dir.full_path());
        let target = join_slashed(&dir, file.name());

        let fail = {
            let store = self.store();
            if !store.is_dir(&dir) {
                debug!(path = %target, "target directory missing");
                return Ok(false);
            }
            if store.is_locked(&dir) {
                return Err(BackendError::denied(dir));
            }
            if store.is_dir(&target) {
                warn!(path = %target, "a directory is in the way of the copy");
                return Ok(false);
            }
            store.failing_targets.contains(&target)
        };

        // The store is not held while streaming: `source` may be this backend.
        let mut pending = PendingWrite {
            buffer: Vec::with_capacity(file.size() as usize),
            fail,
        };
        let outcome = match stream_into(source, file, &target, &mut pending, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(path = %target, error = %err, "copy failed");
                return Err(err);
            }
        };
        if let CopyOutcome::Cancelled { .. } = outcome {
            return Err(cancelled(&target, outcome));
        }

        let mut store = self.store();
        if store.is_locked(&dir) {
            return Err(BackendError::denied(dir));
        }
        store.entries.retain(|e| e.path != target);
        store
            .entries
            .push(VirtualEntry::file(target, pending.buffer, file.modified()));
        Ok(true)
    }

    fn open_read(&self, file: &FileDescriptor) -> BackendResult<ReadStream> {
        let path = self.normalize(file.full_path());
        let store = self.store();
        match store.find(&path) {
            Some(entry) if !entry.is_directory => {
                Ok(Box::new(Cursor::new(entry.content.as_ref().clone())))
            }
            _ => Err(BackendError::transient(
                path,
                io::Error::new(ErrorKind::NotFound, "file vanished"),
            )),
        }
    }
}
