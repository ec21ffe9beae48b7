//! Progress reporting

use crate::types::{ActionKind, ActionOutcome, ActionRecord, CopyProgress, SyncReport};
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Instant;

/// Terminal view of a running job, fed from [`crate::types::SyncEvent`]s
pub struct ProgressReporter {
    pair_bar: ProgressBar,
    transfer_bar: ProgressBar,
    started_at: Option<Instant>,
    transferred_bytes: u64,
    actions: usize,
    failures: usize,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let pair_bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            pair_bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        }

        let transfer_bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{bar:30.cyan/blue} {bytes}/{total_bytes} | {msg}",
        ) {
            transfer_bar.set_style(style.progress_chars("=>-"));
        }

        Self {
            pair_bar,
            transfer_bar,
            started_at: None,
            transferred_bytes: 0,
            actions: 0,
            failures: 0,
        }
    }

    /// Reporter that draws nothing (`--quiet`, `--json`)
    pub fn hidden() -> Self {
        let reporter = Self::new();
        reporter.pair_bar.set_draw_target(ProgressDrawTarget::hidden());
        reporter
            .transfer_bar
            .set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// A directory pair started
    pub fn start_pair(&mut self, index: usize, source: &str, target: &str) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        self.pair_bar.enable_steady_tick(std::time::Duration::from_millis(120));
        self.pair_bar
            .set_message(format!("Pair {}: {} -> {}", index + 1, source, target));
    }

    /// Byte progress of the current copy
    pub fn update_copy(&self, progress: &CopyProgress) {
        if self.transfer_bar.length() != Some(progress.total_bytes) {
            self.transfer_bar.set_length(progress.total_bytes);
        }
        self.transfer_bar.set_position(progress.bytes_transferred);
        self.transfer_bar.set_message(progress.path.clone());
    }

    /// One entry-level action finished
    pub fn record_action(&mut self, record: &ActionRecord) {
        match &record.outcome {
            ActionOutcome::Succeeded => {
                if record.kind.is_mutation() {
                    self.actions += 1;
                }
                if record.kind == ActionKind::Copy {
                    self.transferred_bytes = self
                        .transferred_bytes
                        .saturating_add(record.bytes.unwrap_or(0));
                    let throughput = self.current_throughput_bps();
                    self.transfer_bar.set_message(format!(
                        "{} transferred | {}/s",
                        HumanBytes(self.transferred_bytes),
                        HumanBytes(throughput)
                    ));
                }
            }
            ActionOutcome::Failed { kind, message } => {
                self.failures += 1;
                self.transfer_bar.println(format!(
                    "ERROR {} {}: {} ({})",
                    record.kind.name(),
                    record.path,
                    message,
                    kind.label()
                ));
            }
            ActionOutcome::Cancelled => {
                self.transfer_bar
                    .println(format!("CANCELLED {} {}", record.kind.name(), record.path));
            }
        }
    }

    /// A directory pair finished
    pub fn finish_pair(&self, index: usize, report: &SyncReport) {
        self.pair_bar.println(format!(
            "Pair {}: {} actions, {} skipped, {} errors",
            index + 1,
            report.actions_performed(),
            report.skipped,
            report.errors
        ));
    }

    /// Finalize the view with the job totals
    pub fn finish(&self, total: &SyncReport) {
        let throughput = self.current_throughput_bps();
        self.pair_bar.finish_and_clear();
        self.transfer_bar.finish_with_message(format!(
            "Done: {} copied, {} dirs created, {} deleted, {} failed | {} total | {}/s",
            total.copied,
            total.created_dirs,
            total.deleted_files + total.deleted_dirs,
            total.errors,
            HumanBytes(total.bytes_copied),
            HumanBytes(throughput)
        ));
    }

    fn current_throughput_bps(&self) -> u64 {
        match self.started_at {
            Some(started) => {
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 {
                    (self.transferred_bytes as f64 / secs) as u64
                } else {
                    0
                }
            }
            None => 0,
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CancelToken, FailureKind};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_copy_progress_moves_transfer_bar() {
        let reporter = ProgressReporter::hidden();
        reporter.update_copy(&CopyProgress {
            path: "/dst/a.bin".to_string(),
            bytes_transferred: 512,
            total_bytes: 2048,
            cancel: CancelToken::new(),
        });

        assert_eq!(reporter.transfer_bar.position(), 512);
        assert_eq!(reporter.transfer_bar.length(), Some(2048));
        assert!(reporter.transfer_bar.message().contains("a.bin"));
    }

    #[test]
    fn test_actions_are_counted() {
        let mut reporter = ProgressReporter::hidden();
        reporter.start_pair(0, "/src", "/dst");
        reporter
            .record_action(&ActionRecord::succeeded(ActionKind::Copy, "/dst/a").with_bytes(128));
        reporter.record_action(&ActionRecord::succeeded(ActionKind::Skip, "/dst/b"));
        reporter.record_action(&ActionRecord::failed(
            ActionKind::DeleteFile,
            "/dst/c",
            FailureKind::Authorization,
            "locked",
        ));

        assert_eq!(reporter.actions, 1);
        assert_eq!(reporter.failures, 1);
        assert_eq!(reporter.transferred_bytes, 128);
    }

    #[test]
    fn test_throughput_becomes_non_zero_after_transfer_time() {
        let mut reporter = ProgressReporter::hidden();
        reporter.start_pair(0, "/src", "/dst");
        thread::sleep(Duration::from_millis(30));
        reporter
            .record_action(&ActionRecord::succeeded(ActionKind::Copy, "/dst/a").with_bytes(1024));

        assert!(reporter.current_throughput_bps() > 0);
    }

    #[test]
    fn test_finish_executes_without_panicking() {
        let mut reporter = ProgressReporter::hidden();
        reporter.start_pair(0, "/src", "/dst");
        let report = SyncReport {
            copied: 2,
            bytes_copied: 10,
            ..Default::default()
        };
        reporter.finish_pair(0, &report);
        reporter.finish(&report);
    }
}
