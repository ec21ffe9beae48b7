//! Descriptors - immutable snapshots of files and directories on a backend

use crate::backend::remote::RemoteEndpoint;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Backend-specific facts carried by a descriptor
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EntryDetail {
    /// Local disk: nothing beyond the common fields
    #[default]
    Local,

    /// Remote entry, with the endpoint it was resolved from
    Remote(Arc<RemoteEndpoint>),

    /// In-memory entry
    Virtual { locked: bool, is_directory: bool },
}

/// Snapshot of a file's identity and metadata at resolve time
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    name: String,
    full_path: String,
    parent_path: String,
    size: u64,
    modified: SystemTime,
    exists: bool,
    detail: EntryDetail,
}

impl FileDescriptor {
    /// Describe an existing file
    pub fn new(
        name: impl Into<String>,
        full_path: impl Into<String>,
        parent_path: impl Into<String>,
        size: u64,
        modified: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            full_path: full_path.into(),
            parent_path: parent_path.into(),
            size,
            modified,
            exists: true,
            detail: EntryDetail::Local,
        }
    }

    /// Describe a path that does not exist (size 0, epoch timestamp)
    pub fn missing(
        name: impl Into<String>,
        full_path: impl Into<String>,
        parent_path: impl Into<String>,
    ) -> Self {
        Self {
            exists: false,
            ..Self::new(name, full_path, parent_path, 0, UNIX_EPOCH)
        }
    }

    /// Attach backend-specific detail
    pub fn with_detail(mut self, detail: EntryDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized full path in the owning backend's canonical form
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Path of the owning directory (a relation, not ownership)
    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Whether the file existed when it was resolved
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn detail(&self) -> &EntryDetail {
        &self.detail
    }

    /// Two descriptors name the same entity when their normalized paths match
    pub fn same_entity(&self, other: &FileDescriptor) -> bool {
        self.full_path == other.full_path
    }
}

/// Snapshot of a directory's identity; children are queried by path
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryDescriptor {
    name: String,
    full_path: String,
    parent_path: Option<String>,
    exists: bool,
    locked: bool,
    detail: EntryDetail,
}

impl DirectoryDescriptor {
    /// Describe a directory; `parent_path` is `None` for a backend root
    pub fn new(
        name: impl Into<String>,
        full_path: impl Into<String>,
        parent_path: Option<String>,
        exists: bool,
    ) -> Self {
        Self {
            name: name.into(),
            full_path: full_path.into(),
            parent_path,
            exists,
            locked: false,
            detail: EntryDetail::Local,
        }
    }

    /// Mark the directory as locked (virtual backend only)
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Attach backend-specific detail
    pub fn with_detail(mut self, detail: EntryDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn parent_path(&self) -> Option<&str> {
        self.parent_path.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn detail(&self) -> &EntryDetail {
        &self.detail
    }

    pub fn same_entity(&self, other: &DirectoryDescriptor) -> bool {
        self.full_path == other.full_path
    }
}
