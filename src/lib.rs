//! # treesync - directory tree synchronization
//!
//! Compares a source and a target tree and replicates additions, updates
//! and (optionally) deletions between storage backends: local disk, an FTP
//! server, or an in-memory filesystem used in tests.
//!
//! ```
//! use treesync::backend::{Backend, VirtualBackend};
//! use treesync::{SyncEngine, SyncOptions};
//!
//! let fs = VirtualBackend::new();
//! fs.add_file("/src/a.txt", b"hello".to_vec());
//! fs.add_directory("/dst");
//!
//! let report = SyncEngine::new(&fs, &fs, SyncOptions::default())
//!     .run("/src", "/dst")
//!     .expect("sync runs");
//! assert_eq!(report.copied, 1);
//! assert!(fs.file_exists("/dst/a.txt"));
//! ```

// Module declarations
pub mod backend;
pub mod commands;
pub mod config;
pub mod copy;
pub mod diff;
pub mod hash;
pub mod job;
pub mod logging;
pub mod rules;
pub mod types;
pub mod ui;

// Re-export commonly used types
pub use backend::{Backend, BackendKind, CopyContext};
pub use config::{load_job_settings, JobSettings};
pub use diff::{ComparePolicy, Direction, SyncEngine, SyncOptions};
pub use job::{JobHandle, JobReport, SyncJob};
pub use types::{
    BackendError, CancelToken, EventSink, FailureKind, SyncError, SyncEvent, SyncReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
