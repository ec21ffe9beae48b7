//! Core type definitions for treesync

mod action;
mod descriptor;
mod error;
mod event;
mod report;

pub use action::{ActionKind, ActionOutcome, ActionRecord};
pub use descriptor::{DirectoryDescriptor, EntryDetail, FileDescriptor};
pub use error::{BackendError, FailureKind, SyncError};
pub use event::{CancelToken, CopyProgress, EventSink, SyncEvent};
pub use report::SyncReport;
