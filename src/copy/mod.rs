//! Streaming copy between two open streams
//!
//! A [`StreamCopy`] moves bytes chunk by chunk from a reader to a writer,
//! emits a [`SyncEvent::Progress`] after every chunk and checks the shared
//! [`CancelToken`] at each chunk boundary. It never retries; the caller owns
//! retry policy.
//!
//! States: `Idle -> Running -> {Completed | Cancelled | Failed}`. A
//! `StreamCopy` runs once.

use crate::types::{CancelToken, CopyProgress, EventSink, SyncEvent};
use std::io::{self, ErrorKind, Read, Write};

/// Default chunk size (128 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Lifecycle of a streaming copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Successful end states of a copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Source reached end-of-stream
    Completed { bytes: u64 },

    /// Cancel token was set; the copy stopped after the current chunk
    Cancelled { bytes: u64 },
}

impl CopyOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            CopyOutcome::Completed { bytes } | CopyOutcome::Cancelled { bytes } => *bytes,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyOutcome::Cancelled { .. })
    }
}

/// Tuning for a copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Bytes read per iteration
    pub chunk_size: usize,

    /// Drop the source handle when [`StreamCopy::run_handles`] returns
    pub close_source: bool,

    /// Drop the target handle when [`StreamCopy::run_handles`] returns
    pub close_target: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            close_source: true,
            close_target: true,
        }
    }
}

/// Chunked, cancellable, progress-reporting byte transfer
#[derive(Debug)]
pub struct StreamCopy {
    path: String,
    options: CopyOptions,
    cancel: CancelToken,
    events: EventSink,
    state: CopyState,
}

impl StreamCopy {
    /// Create an idle copy; `path` names the target in progress events
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            options: CopyOptions::default(),
            cancel: CancelToken::new(),
            events: EventSink::discard(),
            state: CopyState::Idle,
        }
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.options.chunk_size = chunk_size;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    /// Copy `source` into `target`.
    ///
    /// Streams passed by value are closed when this returns; pass `&mut`
    /// to keep them. `total_bytes` is the expected size reported in
    /// progress events.
    ///
    /// # Errors
    /// Any read or write error moves the copy to `Failed` and is returned
    /// unchanged. Running a copy twice is an `InvalidInput` error.
    pub fn run<R: Read, W: Write>(
        &mut self,
        mut source: R,
        mut target: W,
        total_bytes: u64,
    ) -> io::Result<CopyOutcome> {
        if self.state != CopyState::Idle {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("copy of {} already ran", self.path),
            ));
        }
        self.state = CopyState::Running;

        let result = self.pump(&mut source, &mut target, total_bytes);
        self.state = match &result {
            Ok(CopyOutcome::Completed { .. }) => CopyState::Completed,
            Ok(CopyOutcome::Cancelled { .. }) => CopyState::Cancelled,
            Err(_) => CopyState::Failed,
        };
        result
    }

    /// Copy between caller-held handles, closing them per [`CopyOptions`]
    /// regardless of the outcome.
    pub fn run_handles<R: Read, W: Write>(
        &mut self,
        source: &mut Option<R>,
        target: &mut Option<W>,
        total_bytes: u64,
    ) -> io::Result<CopyOutcome> {
        let result = match (source.as_mut(), target.as_mut()) {
            (Some(reader), Some(writer)) => self.run(reader, writer, total_bytes),
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "copy requires an open source and target",
            )),
        };

        if self.options.close_source {
            source.take();
        }
        if self.options.close_target {
            if let Some(mut writer) = target.take() {
                // Close errors matter only if the copy itself went fine.
                let flushed = writer.flush();
                if result.is_ok() {
                    flushed?;
                }
            }
        }
        result
    }

    fn pump<R: Read, W: Write>(
        &self,
        source: &mut R,
        target: &mut W,
        total_bytes: u64,
    ) -> io::Result<CopyOutcome> {
        let mut buffer = vec![0u8; self.options.chunk_size.max(1)];
        let mut transferred = 0u64;

        loop {
            let bytes_read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            target.write_all(&buffer[..bytes_read])?;
            transferred += bytes_read as u64;

            self.events.emit(SyncEvent::Progress(CopyProgress {
                path: self.path.clone(),
                bytes_transferred: transferred,
                total_bytes,
                cancel: self.cancel.clone(),
            }));

            if self.cancel.is_cancelled() {
                return Ok(CopyOutcome::Cancelled { bytes: transferred });
            }
        }

        target.flush()?;
        Ok(CopyOutcome::Completed { bytes: transferred })
    }
}
