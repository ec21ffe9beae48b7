//! Main sync command

use crate::config::load_job_settings;
use crate::job::{JobReport, SyncJob};
use crate::types::{ActionKind, ActionOutcome, ActionRecord, FailureKind, SyncError, SyncEvent};
use crate::ui::ProgressReporter;
use console::style;
use std::collections::BTreeMap;
use std::path::Path;

/// How the command presents a run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Print every event as one JSON line on stdout
    pub json: bool,
    /// No progress view, only the final summary
    pub quiet: bool,
    /// Force a dry run regardless of the job file
    pub dry_run: bool,
}

/// Load the job at `job_path` and run it to completion
pub fn run(job_path: &Path, options: RunOptions) -> Result<JobReport, SyncError> {
    let mut settings = load_job_settings(job_path)?;
    settings.dry_run |= options.dry_run;
    let dry_run = settings.dry_run;

    let mut handle = SyncJob::new(settings)?.start()?;
    let mut reporter = if options.json || options.quiet {
        ProgressReporter::hidden()
    } else {
        ProgressReporter::new()
    };
    let mut errors: Vec<ErrorRecord> = Vec::new();
    let mut planned: Vec<ActionRecord> = Vec::new();

    while let Some(event) = handle.next_event_blocking() {
        if options.json {
            print_json_line(&event);
        }
        match &event {
            SyncEvent::PairStarted {
                index,
                source,
                target,
            } => reporter.start_pair(*index, source, target),
            SyncEvent::Progress(progress) => reporter.update_copy(progress),
            SyncEvent::Action(record) => {
                reporter.record_action(record);
                if let Some(error) = ErrorRecord::from_action(record) {
                    errors.push(error);
                }
                if dry_run && record.kind.is_mutation() {
                    planned.push(record.clone());
                }
            }
            SyncEvent::PairFinished { index, report } => reporter.finish_pair(*index, report),
        }
    }

    let report = handle.join()?;
    reporter.finish(&report.total);

    if options.json {
        let line = serde_json::json!({ "event": "job-finished", "report": &report });
        println!("{line}");
        return Ok(report);
    }

    if dry_run {
        println!("{}", format_dry_run_actions(&planned));
        println!("Dry-run mode: no changes were made.");
    }
    println!("{}", format_report_summary(&report));
    if !errors.is_empty() {
        println!("{}", format_error_summary(&errors));
    }
    if report.cancelled() {
        println!("{}", style("Synchronization was cancelled.").yellow());
    }
    Ok(report)
}

fn print_json_line(event: &SyncEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
    }
}

fn format_report_summary(report: &JobReport) -> String {
    let total = &report.total;
    let heading = if report.name.is_empty() {
        "Summary:".to_string()
    } else {
        format!("Summary ({}):", report.name)
    };
    format!(
        "{}\n  Copied: {}  Created: {}  Deleted: {}  Skipped: {}  Errors: {}\n  Bytes copied: {}",
        heading,
        total.copied,
        total.created_dirs,
        total.deleted_files + total.deleted_dirs,
        total.skipped,
        total.errors,
        indicatif::HumanBytes(total.bytes_copied)
    )
}

fn format_dry_run_actions(planned: &[ActionRecord]) -> String {
    if planned.is_empty() {
        return "Dry-run actions:\n  (no planned actions)".to_string();
    }

    let mut lines = Vec::with_capacity(planned.len() + 1);
    lines.push("Dry-run actions:".to_string());
    for record in planned {
        let label = match record.kind {
            ActionKind::Copy => "COPY",
            ActionKind::CreateDirectory => "MKDIR",
            ActionKind::DeleteFile => "DELETE",
            ActionKind::DeleteDirectory => "RMDIR",
            ActionKind::Skip | ActionKind::Error => continue,
        };
        lines.push(format!("  {:<9} {}", label, record.path));
    }
    lines.join("\n")
}

#[derive(Debug)]
struct ErrorRecord {
    kind: FailureKind,
    path: String,
    message: String,
    suggestion: Option<&'static str>,
}

impl ErrorRecord {
    fn from_action(record: &ActionRecord) -> Option<Self> {
        let ActionOutcome::Failed { kind, message } = &record.outcome else {
            return None;
        };
        Some(Self {
            kind: *kind,
            path: record.path.clone(),
            message: message.clone(),
            suggestion: suggestion_for(*kind),
        })
    }
}

fn suggestion_for(kind: FailureKind) -> Option<&'static str> {
    match kind {
        FailureKind::NotFound => Some("Verify the path still exists and retry."),
        FailureKind::Authorization => {
            Some("Check permissions on the target, or unlock the directory.")
        }
        FailureKind::TransientIo => {
            Some("Retry the sync. If this keeps happening, check disk or network stability.")
        }
        FailureKind::ConfigurationCorrupt => Some("Fix the job file and retry."),
        FailureKind::Cancelled | FailureKind::PreconditionViolated => None,
    }
}

fn format_error_summary(records: &[ErrorRecord]) -> String {
    let mut groups: BTreeMap<&'static str, Vec<&ErrorRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.kind.label()).or_default().push(record);
    }

    let mut lines = Vec::new();
    lines.push(style("Error summary:").red().bold().to_string());
    for (kind, items) in groups {
        lines.push(format!("  {} ({}):", kind, items.len()));
        for record in items.iter().take(3) {
            lines.push(format!("    - {}", record.message));
            lines.push(format!("      Path: {}", record.path));
            if let Some(suggestion) = record.suggestion {
                lines.push(format!("      Try: {}", suggestion));
            }
        }
        if items.len() > 3 {
            lines.push(format!("    - ... {} more", items.len() - 3));
        }
    }
    lines.join("\n")
}
