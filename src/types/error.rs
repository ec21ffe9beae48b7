//! Error types for treesync

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy shared by backend operations and entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Entry is absent (answered by existence checks, never raised by resolve)
    NotFound,
    /// Target or parent is locked, or access was denied
    Authorization,
    /// Network or disk error during a single operation
    TransientIo,
    /// User-requested stop mid-transfer
    Cancelled,
    /// Job settings file unreadable or invalid
    ConfigurationCorrupt,
    /// Invalid arguments to a backend operation
    PreconditionViolated,
}

impl FailureKind {
    /// Short label used in transcripts and error summaries
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "Not found",
            FailureKind::Authorization => "Access denied",
            FailureKind::TransientIo => "I/O error",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::ConfigurationCorrupt => "Corrupt configuration",
            FailureKind::PreconditionViolated => "Invalid request",
        }
    }
}

/// Operation-level failure returned by the `try_*` backend calls
#[derive(Debug, Error)]
pub enum BackendError {
    /// Target directory (or its parent) is locked or access is forbidden
    #[error("Access denied: {path}")]
    Authorization { path: String },

    /// A single operation failed on the wire or on disk
    #[error("I/O failure on {path}: {source}")]
    Transient {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The copy was stopped through the cancel token
    #[error("Transfer cancelled: {path} after {transferred} bytes")]
    Cancelled { path: String, transferred: u64 },

    /// Caller passed something the backend cannot act on
    #[error("Precondition violated: {0}")]
    Precondition(String),
}

impl BackendError {
    /// Build a transient failure for `path`
    pub fn transient(path: impl Into<String>, source: io::Error) -> Self {
        BackendError::Transient {
            path: path.into(),
            source,
        }
    }

    /// Build an authorization failure for `path`
    pub fn denied(path: impl Into<String>) -> Self {
        BackendError::Authorization { path: path.into() }
    }

    /// Map to the shared taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::Authorization { .. } => FailureKind::Authorization,
            BackendError::Transient { .. } => FailureKind::TransientIo,
            BackendError::Cancelled { .. } => FailureKind::Cancelled,
            BackendError::Precondition(_) => FailureKind::PreconditionViolated,
        }
    }

    /// Check if this error is an authorization failure
    pub fn is_authorization(&self) -> bool {
        matches!(self, BackendError::Authorization { .. })
    }

    /// Check if this error came from a cancelled transfer
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled { .. })
    }

    /// Transient failures are final for the current run only
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BackendError::Transient { .. })
    }
}

/// Error types for treesync entry points
#[derive(Debug, Error)]
pub enum SyncError {
    /// Standard IO error (automatically converted via #[from])
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Job settings file could not be parsed or failed validation
    #[error("Job settings file is corrupt: {path}: {reason}")]
    ConfigurationCorrupt { path: PathBuf, reason: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source directory does not exist on its backend
    #[error("Source directory does not exist: {path}")]
    SourceMissing { path: String },

    /// Target directory does not exist on its backend
    #[error("Target directory does not exist: {path}")]
    TargetMissing { path: String },

    /// Invalid arguments reached a backend operation
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Remote backend could not connect or log in
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Backend operation failure that escaped the per-entry loop
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SyncError {
    /// Map to the shared taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Io(e) if e.kind() == io::ErrorKind::NotFound => FailureKind::NotFound,
            SyncError::Io(_) | SyncError::Connection(_) => FailureKind::TransientIo,
            SyncError::ConfigurationCorrupt { .. } => FailureKind::ConfigurationCorrupt,
            SyncError::Config(_) | SyncError::Precondition(_) => {
                FailureKind::PreconditionViolated
            }
            SyncError::SourceMissing { .. } | SyncError::TargetMissing { .. } => {
                FailureKind::NotFound
            }
            SyncError::Backend(e) => e.kind(),
        }
    }

    /// Check if the job settings file is the problem
    pub fn is_configuration_corrupt(&self) -> bool {
        matches!(self, SyncError::ConfigurationCorrupt { .. })
    }

    /// Check if this error is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_)
                | SyncError::Precondition(_)
                | SyncError::ConfigurationCorrupt { .. }
        )
    }

    /// Check if a later run may succeed without user intervention
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Io(_) | SyncError::Connection(_) => true,
            SyncError::Backend(e) => e.is_recoverable() || e.is_cancelled(),
            _ => false,
        }
    }
}

impl From<BackendError> for io::Error {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Transient { source, .. } => source,
            BackendError::Authorization { path } => {
                io::Error::new(io::ErrorKind::PermissionDenied, path)
            }
            BackendError::Cancelled { path, .. } => {
                io::Error::new(io::ErrorKind::Interrupted, path)
            }
            BackendError::Precondition(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
        }
    }
}
