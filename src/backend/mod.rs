//! Storage backends behind one filesystem contract
//!
//! Every backend (local disk, FTP, in-memory) implements [`Backend`], so the
//! sync engine runs unmodified over any pairing of them. Mutating calls
//! follow the `try_*` pattern: `Ok(true)` when the step happened,
//! `Ok(false)` when it could not be completed (e.g. missing parent), and a
//! [`BackendError`] for authorization failures, transient I/O, cancellation
//! and precondition violations.

pub mod local;
pub mod path;
pub mod remote;
pub mod virtual_fs;

pub use local::LocalBackend;
pub use remote::{RemoteBackend, RemoteEndpoint};
pub use virtual_fs::VirtualBackend;

use crate::copy::{CopyOutcome, StreamCopy, DEFAULT_CHUNK_SIZE};
use crate::types::{
    BackendError, CancelToken, DirectoryDescriptor, EventSink, FileDescriptor,
};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Readable stream over a file on some backend
pub type ReadStream = Box<dyn Read + Send>;

/// Which implementation a backend is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
    Virtual,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "ftp",
            BackendKind::Virtual => "virtual",
        };
        f.write_str(name)
    }
}

/// Per-copy settings handed down by the engine
#[derive(Debug, Clone)]
pub struct CopyContext {
    pub chunk_size: usize,
    pub cancel: CancelToken,
    pub events: EventSink,
}

impl Default for CopyContext {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: CancelToken::new(),
            events: EventSink::discard(),
        }
    }
}

/// Filesystem contract shared by all backends.
///
/// Methods take `&self`: the same instance may serve as both source and
/// target of a job. Paths are normalized to the backend's canonical form
/// before use; descriptors stay valid only until the backend is mutated.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Canonical form of `path` on this backend
    fn normalize(&self, path: &str) -> String;

    /// Resolve a file; missing paths yield a "not found" descriptor
    fn resolve_file(&self, path: &str) -> FileDescriptor;

    /// Resolve a directory; missing paths yield a "not found" descriptor
    fn resolve_directory(&self, path: &str) -> DirectoryDescriptor;

    fn file_exists(&self, path: &str) -> bool;

    fn directory_exists(&self, path: &str) -> bool;

    /// Files directly inside `dir`
    fn list_files(&self, dir: &DirectoryDescriptor) -> BackendResult<Vec<FileDescriptor>>;

    /// Subdirectories directly inside `dir`
    fn list_directories(&self, dir: &DirectoryDescriptor)
        -> BackendResult<Vec<DirectoryDescriptor>>;

    /// Create `target_parent/<source_dir name>`
    fn try_create_directory(
        &self,
        source_dir: &DirectoryDescriptor,
        target_parent: &DirectoryDescriptor,
    ) -> BackendResult<bool>;

    fn try_delete_file(&self, file: &FileDescriptor) -> BackendResult<bool>;

    /// Remove a directory and everything below it
    fn try_delete_directory(&self, dir: &DirectoryDescriptor) -> BackendResult<bool>;

    /// Copy `file` from `source` (possibly another backend) into `target_dir`
    fn try_copy_file(
        &self,
        source: &dyn Backend,
        file: &FileDescriptor,
        target_dir: &DirectoryDescriptor,
        ctx: &CopyContext,
    ) -> BackendResult<bool>;

    fn open_read(&self, file: &FileDescriptor) -> BackendResult<ReadStream>;
}

/// Reject copies of descriptors that do not name a real file
pub(crate) fn check_copy_source(file: &FileDescriptor) -> BackendResult<()> {
    if !path::is_valid_name(file.name()) {
        return Err(BackendError::Precondition(format!(
            "invalid file name in {:?}",
            file.full_path()
        )));
    }
    if !file.exists() {
        return Err(BackendError::Precondition(format!(
            "source file does not exist: {}",
            file.full_path()
        )));
    }
    Ok(())
}

/// Stream `file` from `source` into `writer` through a [`StreamCopy`]
pub(crate) fn stream_into<W: Write>(
    source: &dyn Backend,
    file: &FileDescriptor,
    target_path: &str,
    writer: &mut W,
    ctx: &CopyContext,
) -> BackendResult<CopyOutcome> {
    let mut reader = source.open_read(file)?;
    let mut copy = StreamCopy::new(target_path)
        .with_chunk_size(ctx.chunk_size)
        .with_cancel(ctx.cancel.clone())
        .with_events(ctx.events.clone());

    copy.run(&mut reader, writer, file.size())
        .map_err(|e| map_io_error(target_path, e))
}

/// Translate an I/O error into the backend taxonomy
pub(crate) fn map_io_error(path: &str, error: io::Error) -> BackendError {
    if error.kind() == ErrorKind::PermissionDenied {
        BackendError::denied(path)
    } else {
        BackendError::transient(path, error)
    }
}

/// Turn a cancelled copy into the matching error
pub(crate) fn cancelled(path: &str, outcome: CopyOutcome) -> BackendError {
    BackendError::Cancelled {
        path: path.to_string(),
        transferred: outcome.bytes(),
    }
}
