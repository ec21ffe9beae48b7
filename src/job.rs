//! Job runner: loads settings, opens backends and runs every pair
//!
//! [`SyncJob::start`] runs the job on one worker thread and hands back a
//! [`JobHandle`] for polling events, cancelling and collecting the result.

use crate::backend::{Backend, LocalBackend, RemoteBackend};
use crate::config::{load_job_settings, BackendSpec, JobSettings};
use crate::diff::SyncEngine;
use crate::types::{CancelToken, EventSink, SyncError, SyncEvent, SyncReport};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

/// Opens the backend described by a [`BackendSpec`]
pub type BackendOpener =
    Arc<dyn Fn(&BackendSpec) -> Result<Arc<dyn Backend>, SyncError> + Send + Sync>;

/// Open a backend for one side of a pair.
///
/// # Errors
/// `SyncError::Connection` when a remote server is unreachable or rejects
/// the login.
pub fn open_backend(spec: &BackendSpec) -> Result<Arc<dyn Backend>, SyncError> {
    match spec {
        BackendSpec::Local => Ok(Arc::new(LocalBackend::new())),
        BackendSpec::Ftp(settings) => Ok(Arc::new(RemoteBackend::connect(settings.endpoint())?)),
    }
}

/// Outcome of a whole job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub name: String,
    /// One report per pair that ran, in job order
    pub pairs: Vec<SyncReport>,
    /// Sum over all pairs
    pub total: SyncReport,
}

impl JobReport {
    pub fn cancelled(&self) -> bool {
        self.total.cancelled
    }

    pub fn has_errors(&self) -> bool {
        self.total.has_errors()
    }
}

/// A loaded, validated job
pub struct SyncJob {
    settings: JobSettings,
    opener: BackendOpener,
}

impl std::fmt::Debug for SyncJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncJob")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncJob {
    /// Load job settings from a TOML or JSON file
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        Self::new(load_job_settings(path)?)
    }

    /// Wrap already-parsed settings
    ///
    /// # Errors
    /// `SyncError::Config` when the settings fail validation.
    pub fn new(settings: JobSettings) -> Result<Self, SyncError> {
        settings.validate()?;
        Ok(Self {
            settings,
            opener: Arc::new(open_backend),
        })
    }

    /// Replace how backends are opened (used to run jobs on in-memory backends)
    pub fn with_opener(mut self, opener: BackendOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Run every pair on the calling thread.
    ///
    /// All backends are opened before the first pair starts, so connection
    /// problems surface before anything is copied. Cancellation stops the
    /// running pair and skips the remaining ones.
    pub fn run(&self, events: &EventSink, cancel: &CancelToken) -> Result<JobReport, SyncError> {
        info!(job = %self.settings.name, pairs = self.settings.pairs.len(), "starting job");

        let mut opened = Vec::with_capacity(self.settings.pairs.len());
        for pair in &self.settings.pairs {
            let source = (self.opener)(&pair.source_backend)?;
            let target = (self.opener)(&pair.target_backend)?;
            opened.push((source, target));
        }

        let mut report = JobReport {
            name: self.settings.name.clone(),
            ..JobReport::default()
        };
        let pairs = self.settings.pairs.iter().zip(&opened).enumerate();
        for (index, (pair, (source, target))) in pairs {
            if cancel.is_cancelled() {
                report.total.cancelled = true;
                break;
            }
            events.emit(SyncEvent::PairStarted {
                index,
                source: pair.source.clone(),
                target: pair.target.clone(),
            });

            let options = pair.options(&self.settings);
            let engine = SyncEngine::new(source.as_ref(), target.as_ref(), options)
                .with_filter(pair.filter()?)
                .with_events(events.clone())
                .with_cancel(cancel.clone());
            let pair_report = engine.run(&pair.source, &pair.target)?;

            events.emit(SyncEvent::PairFinished {
                index,
                report: pair_report.clone(),
            });
            report.total.merge(&pair_report);
            report.pairs.push(pair_report);

            if report.total.cancelled {
                break;
            }
        }

        info!(
            job = %self.settings.name,
            actions = report.total.actions_performed(),
            errors = report.total.errors,
            cancelled = report.total.cancelled,
            "job finished"
        );
        Ok(report)
    }

    /// Run the job on a worker thread
    pub fn start(self) -> Result<JobHandle, SyncError> {
        let (events, receiver) = EventSink::channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let worker = thread::Builder::new()
            .name("treesync-job".to_string())
            .spawn(move || {
                let result = self.run(&events, &token);
                if let Err(e) = &result {
                    error!(error = %e, "job failed");
                }
                result
            })?;

        Ok(JobHandle {
            events: receiver,
            cancel,
            worker,
        })
    }
}

/// Handle to a job running on its worker thread
#[derive(Debug)]
pub struct JobHandle {
    events: UnboundedReceiver<SyncEvent>,
    cancel: CancelToken,
    worker: JoinHandle<Result<JobReport, SyncError>>,
}

impl JobHandle {
    /// Block until the next event; `None` once the job finished and every
    /// event was delivered. Must not be called from an async context.
    pub fn next_event_blocking(&mut self) -> Option<SyncEvent> {
        self.events.blocking_recv()
    }

    /// Next event if one is queued
    pub fn try_next_event(&mut self) -> Option<SyncEvent> {
        self.events.try_recv().ok()
    }

    /// Await the next event
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Ask the job to stop after the current chunk
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and return the job's result
    pub fn join(self) -> Result<JobReport, SyncError> {
        self.worker
            .join()
            .map_err(|_| SyncError::Io(io::Error::other("sync worker panicked")))?
    }
}
