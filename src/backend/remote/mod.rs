//! FTP backend
//!
//! One control connection is kept per backend and re-established lazily
//! after a transport failure. Reads open a dedicated session so a copy
//! between two paths of the same server never interleaves commands on the
//! upload's control connection. Uploads go to `<name>.part` and are renamed
//! into place once the server confirmed the transfer.

pub mod ftp;
pub mod listing;

use self::ftp::{is_reply_error, FtpSession};
use self::listing::ListEntry;
use super::path::{is_valid_name, join_slashed, normalize_slashed, split_slashed};
use super::{
    cancelled, check_copy_source, map_io_error, Backend, BackendKind, BackendResult, CopyContext,
    ReadStream,
};
use crate::copy::{CopyOutcome, StreamCopy};
use crate::types::{BackendError, DirectoryDescriptor, EntryDetail, FileDescriptor, SyncError};
use std::fmt;
use std::io::{self, ErrorKind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Default FTP control port
pub const DEFAULT_PORT: u16 = 21;

/// Where and how to reach an FTP server
#[derive(Clone, PartialEq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Server directory that backend paths are relative to
    pub root: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// Passive (PASV) data connections; active mode uses PORT
    pub passive: bool,
}

impl RemoteEndpoint {
    /// Anonymous passive-mode endpoint with default timeouts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: "anonymous".to_string(),
            password: String::new(),
            root: "/".to_string(),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            passive: true,
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// Server-side path of a canonical backend path
    pub fn server_path(&self, canonical: &str) -> String {
        let root = normalize_slashed(&self.root, true);
        if root == "/" {
            canonical.to_string()
        } else if canonical == "/" {
            root
        } else {
            format!("{root}{canonical}")
        }
    }
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("root", &self.root)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("passive", &self.passive)
            .finish()
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ftp://{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Backend over an FTP server
#[derive(Debug)]
pub struct RemoteBackend {
    endpoint: Arc<RemoteEndpoint>,
    session: Mutex<Option<FtpSession>>,
}

impl RemoteBackend {
    /// Connect and log in.
    ///
    /// # Errors
    /// `SyncError::Connection` when the server is unreachable, rejects the
    /// credentials, or the configured root is not a directory.
    pub fn connect(endpoint: RemoteEndpoint) -> Result<Self, SyncError> {
        let mut session = FtpSession::open(&endpoint)
            .map_err(|e| SyncError::Connection(format!("{endpoint}: {e}")))?;

        let root = endpoint.server_path("/");
        match session.is_dir(&root) {
            Ok(true) => {}
            Ok(false) => {
                return Err(SyncError::Connection(format!(
                    "{endpoint}: root directory {root} does not exist"
                )))
            }
            Err(e) => return Err(SyncError::Connection(format!("{endpoint}: {e}"))),
        }

        info!(endpoint = %endpoint, "connected");
        Ok(Self {
            endpoint: Arc::new(endpoint),
            session: Mutex::new(Some(session)),
        })
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    /// Run `op` on the shared control connection, reconnecting if needed.
    ///
    /// The connection is kept after success or a plain negative reply and
    /// dropped after any transport error.
    fn with_session<T>(&self, op: impl FnOnce(&mut FtpSession) -> io::Result<T>) -> io::Result<T> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let mut session = match slot.take() {
            Some(session) => session,
            None => {
                debug!(endpoint = %self.endpoint, "reconnecting");
                FtpSession::open(&self.endpoint)?
            }
        };

        let result = op(&mut session);
        match &result {
            Err(e) if !is_reply_error(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "dropping control connection");
            }
            _ => *slot = Some(session),
        }
        result
    }

    fn server_path(&self, canonical: &str) -> String {
        self.endpoint.server_path(canonical)
    }

    fn detail(&self) -> EntryDetail {
        EntryDetail::Remote(Arc::clone(&self.endpoint))
    }

    fn describe_file(
        &self,
        path: &str,
        size: u64,
        modified: Option<std::time::SystemTime>,
    ) -> FileDescriptor {
        let (parent, name) = split_slashed(path);
        FileDescriptor::new(
            name,
            path,
            parent.unwrap_or_default(),
            size,
            modified.unwrap_or(UNIX_EPOCH),
        )
        .with_detail(self.detail())
    }

    fn describe_directory(&self, path: &str, exists: bool) -> DirectoryDescriptor {
        let (parent, name) = split_slashed(path);
        DirectoryDescriptor::new(name, path, parent, exists).with_detail(self.detail())
    }

    fn list(&self, dir: &DirectoryDescriptor) -> BackendResult<Vec<ListEntry>> {
        let canonical = self.normalize(dir.full_path());
        let server = self.server_path(&canonical);
        self.with_session(|session| session.list(&server))
            .map_err(|e| map_io_error(&canonical, e))
    }

    fn is_directory(&self, canonical: &str) -> io::Result<bool> {
        let server = self.server_path(canonical);
        self.with_session(|session| session.is_dir(&server))
    }

    /// Upload into `<target>.part`, then rename over `target`
    fn upload(
        &self,
        source: &dyn Backend,
        file: &FileDescriptor,
        target: &str,
        ctx: &CopyContext,
    ) -> BackendResult<CopyOutcome> {
        let server_target = self.server_path(target);
        let server_part = format!("{server_target}.part");
        let mut reader = source.open_read(file)?;
        let mut copy = StreamCopy::new(target)
            .with_chunk_size(ctx.chunk_size)
            .with_cancel(ctx.cancel.clone())
            .with_events(ctx.events.clone());

        let transfer = self.with_session(|session| {
            let mut upload = session.store(&server_part)?;
            match copy.run(&mut reader, &mut upload, file.size()) {
                Ok(outcome) => {
                    upload.finish()?;
                    Ok(outcome)
                }
                Err(e) => {
                    let _ = upload.finish();
                    Err(e)
                }
            }
        });

        let outcome = match transfer {
            Ok(outcome) if !outcome.is_cancelled() => outcome,
            other => {
                self.discard_part(&server_part);
                return match other {
                    Ok(outcome) => Err(cancelled(target, outcome)),
                    Err(e) => Err(map_io_error(target, e)),
                };
            }
        };

        let modified = file.modified();
        self.with_session(|session| {
            session.rename(&server_part, &server_target)?;
            if let Err(e) = session.set_modified(&server_target, modified) {
                debug!(path = %target, error = %e, "server did not accept MFMT");
            }
            Ok(())
        })
        .map_err(|e| map_io_error(target, e))?;
        Ok(outcome)
    }

    fn discard_part(&self, server_part: &str) {
        if let Err(e) = self.with_session(|session| session.delete_file(server_part)) {
            debug!(path = %server_part, error = %e, "could not remove partial upload");
        }
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        let slot = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = slot.take() {
            session.quit();
        }
    }
}

impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn normalize(&self, path: &str) -> String {
        normalize_slashed(path, true)
    }

    fn resolve_file(&self, path: &str) -> FileDescriptor {
        let path = self.normalize(path);
        let server = self.server_path(&path);
        match self.with_session(|session| session.stat_file(&server)) {
            Ok(Some((size, modified))) => self.describe_file(&path, size, modified),
            Ok(None) => {
                let (parent, name) = split_slashed(&path);
                FileDescriptor::missing(name, path.as_str(), parent.unwrap_or_default())
                    .with_detail(self.detail())
            }
            Err(e) => {
                warn!(path = %path, error = %e, "could not stat remote file");
                let (parent, name) = split_slashed(&path);
                FileDescriptor::missing(name, path.as_str(), parent.unwrap_or_default())
                    .with_detail(self.detail())
            }
        }
    }

    fn resolve_directory(&self, path: &str) -> DirectoryDescriptor {
        let path = self.normalize(path);
        let exists = self.is_directory(&path).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "could not check remote directory");
            false
        });
        self.describe_directory(&path, exists)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.resolve_file(path).exists()
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.resolve_directory(path).exists()
    }

    fn list_files(&self, dir: &DirectoryDescriptor) -> BackendResult<Vec<FileDescriptor>> {
        let base = self.normalize(dir.full_path());
        Ok(self
            .list(dir)?
            .into_iter()
            .filter(|entry| !entry.is_dir && is_valid_name(&entry.name))
            .map(|entry| {
                let path = join_slashed(&base, &entry.name);
                self.describe_file(&path, entry.size, entry.modified)
            })
            .collect())
    }

    fn list_directories(
        &self,
        dir: &DirectoryDescriptor,
    ) -> BackendResult<Vec<DirectoryDescriptor>> {
        let base = self.normalize(dir.full_path());
        Ok(self
            .list(dir)?
            .into_iter()
            .filter(|entry| entry.is_dir && is_valid_name(&entry.name))
            .map(|entry| self.describe_directory(&join_slashed(&base, &entry.name), true))
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
        let server = self.server_path(&path);
        let server_parent = self.server_path(&parent);

        let created = self.with_session(|session| {
            if !session.is_dir(&server_parent)? {
                return Ok(None);
            }
            if session.is_dir(&server)? {
                return Ok(Some(true));
            }
            match session.make_dir(&server) {
                Ok(()) => Ok(Some(true)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(false)),
                Err(e) => Err(e),
            }
        });

        match created {
            Ok(None) => {
                debug!(path = %path, "parent directory missing");
                Ok(false)
            }
            Ok(Some(done)) => Ok(done),
            Err(e) => Err(map_io_error(&path, e)),
        }
    }

    fn try_delete_file(&self, file: &FileDescriptor) -> BackendResult<bool> {
        let path = self.normalize(file.full_path());
        let server = self.server_path(&path);
        match self.with_session(|session| session.delete_file(&server)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io_error(&path, e)),
        }
    }

    fn try_delete_directory(&self, dir: &DirectoryDescriptor) -> BackendResult<bool> {
        let path = self.normalize(dir.full_path());
        if path == "/" {
            return Err(BackendError::Precondition(
                "refusing to delete the remote root".to_string(),
            ));
        }
        let server = self.server_path(&path);
        let removed = self.with_session(|session| {
            if !session.is_dir(&server)? {
                return Ok(false);
            }
            session.remove_tree(&server)?;
            Ok(true)
        });
        removed.map_err(|e| map_io_error(&path, e))
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
        match self.is_directory(&dir) {
            Ok(true) => {}
            Ok(false) => {
                debug!(path = %dir, "target directory missing");
                return Ok(false);
            }
            Err(e) => return Err(map_io_error(&dir, e)),
        }

        let target = join_slashed(&dir, file.name());
        match self.upload(source, file, &target, ctx) {
            Ok(_) => Ok(true),
            Err(err) => {
                if !err.is_cancelled() {
                    warn!(path = %target, error = %err, "copy failed");
                }
                Err(err)
            }
        }
    }

    fn open_read(&self, file: &FileDescriptor) -> BackendResult<ReadStream> {
        let path = self.normalize(file.full_path());
        let server = self.server_path(&path);
        let session = FtpSession::open(&self.endpoint).map_err(|e| map_io_error(&path, e))?;
        let download = session.retrieve(&server).map_err(|e| {
            // A file that disappeared since it was listed is a transient failure.
            if e.kind() == ErrorKind::NotFound {
                BackendError::transient(&path, e)
            } else {
                map_io_error(&path, e)
            }
        })?;
        Ok(Box::new(download))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_path_joins_root() {
        let endpoint = RemoteEndpoint::new("localhost", DEFAULT_PORT).with_root("/srv/data/");
        assert_eq!(endpoint.server_path("/"), "/srv/data");
        assert_eq!(endpoint.server_path("/a/b"), "/srv/data/a/b");

        let plain = RemoteEndpoint::new("localhost", DEFAULT_PORT);
        assert_eq!(plain.server_path("/a"), "/a");
    }

    #[test]
    fn test_debug_redacts_password() {
        let endpoint =
            RemoteEndpoint::new("ftp.example.com", 2121).with_credentials("alice", "s3cret");
        let debug = format!("{endpoint:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
        assert_eq!(endpoint.to_string(), "ftp://alice@ftp.example.com:2121");
    }

    #[test]
    fn test_connect_refused_is_connection_error() {
        // Bind then drop to obtain a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .expect("free port");
        let endpoint = RemoteEndpoint::new("127.0.0.1", port)
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(500));

        let err = RemoteBackend::connect(endpoint).expect_err("nothing listens there");
        assert!(matches!(err, SyncError::Connection(_)));
    }
}
