//! Events emitted by the engine and backends, and the channel they travel on

use super::{ActionRecord, SyncReport};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Shared cancellation flag, checked at every chunk boundary
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running job stops after the current chunk
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Byte progress of one file copy
#[derive(Debug, Clone, Serialize)]
pub struct CopyProgress {
    /// Target path being written
    pub path: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Listener-side handle to stop the transfer early
    #[serde(skip)]
    pub cancel: CancelToken,
}

impl CopyProgress {
    /// Ask the copy to stop after the current chunk
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Completed fraction in `0.0..=1.0` (1.0 for empty files)
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0)
        }
    }
}

/// Structured event consumed by the presentation layer and history collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// A directory pair of the job started
    PairStarted {
        index: usize,
        source: String,
        target: String,
    },

    /// An entry-level action finished
    Action(ActionRecord),

    /// Byte progress of the copy currently running
    Progress(CopyProgress),

    /// A directory pair finished (also emitted when it was cancelled)
    PairFinished { index: usize, report: SyncReport },
}

/// Sending half of the event stream; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<SyncEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver that polls it
    pub fn channel() -> (Self, UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening anymore.
            let _ = tx.send(event);
        }
    }

    pub fn action(&self, record: ActionRecord) {
        self.emit(SyncEvent::Action(record));
    }
}
